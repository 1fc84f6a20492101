pub mod batcher;
pub mod consumer;
pub mod error;
pub mod memory;
pub mod sink;
pub mod sqs;

pub use batcher::MicroBatcher;
pub use consumer::{QueueConsumer, QueueHealth, QueueMessage};
pub use error::QueueError;
pub use memory::MemoryQueue;
pub use sink::{MessageSink, OutboundMessage};
pub use sqs::{sqs_client, SqsConsumer, SqsProducer};
