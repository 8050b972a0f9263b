//! Application services for message delivery.

mod delivery;
mod sync_guard;

pub use delivery::{
    AttachmentUpload, ConnectionStatus, DeliveryCoordinator, DeliveryResult, MessageDraft,
    ReceiveOutcome, SyncOutcome, TickReport,
};
pub use sync_guard::SyncState;
