pub mod creators;
pub mod event;
pub mod handler;
pub mod ingress;
pub mod signature;
pub mod store_pg;
pub mod tracker;

pub use creators::{CreatorStore, MemoryCreatorStore, UpsertOutcome};
pub use event::{
    MemoryWebhookEventStore, WebhookEvent, WebhookEventStatus, WebhookEventStore, WebhookPayload,
};
pub use handler::{AlertSink, LogAlertSink, WebhookProcessor};
pub use ingress::{webhook_routes, Enqueuer, IngressState};
pub use signature::{sign_payload, verify_signature, SIGNATURE_HEADER};
pub use store_pg::{PgCreatorStore, PgWebhookEventStore};
pub use tracker::{RunObserver, RunTracker, RunUpdate};
