//! Stillreel Delivery
//!
//! Hands a finished [`VideoArtifact`](stillreel_job_model::VideoArtifact)
//! to its destination:
//! - **Channel:** The caller-facing byte stream (`begin` / `write_chunk` / `finish`)
//! - **Deliver:** Inline streaming, attachment download, or external upload
//! - **Sink:** The external artifact store, over HTTP or in memory

pub mod channel;
pub mod deliver;
pub mod sink;

pub use channel::{ResponseChannel, ResponseHead, WriterChannel};
pub use deliver::{DeliveryError, DeliveryResult, DeliverySink, DeliveryTarget, UploadAck};
pub use sink::{
    ArtifactSink, ArtifactUpload, HttpArtifactSink, MemoryArtifactSink, SinkError, SinkTarget,
};
