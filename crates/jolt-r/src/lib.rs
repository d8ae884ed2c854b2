pub mod bridge;
pub mod server;

pub use bridge::{BridgeRouter, ChunkAssembler, MAX_PENDING_BODIES, RemoteBridge};
pub use server::{BridgeServer, InboundEvent, ServerHandle};
