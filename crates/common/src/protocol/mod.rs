// Wire protocol spoken over a document channel.

pub mod payload;
pub mod ws;
