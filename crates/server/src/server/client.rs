//! Client session state.

use crate::input::Input;
use crate::world::World;
use bytes::Bytes;
use protocol::{ClientMessage, EntityId, ProtocolError};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// A connected, authenticated client bound to one entity.
#[derive(Debug)]
pub struct ClientSession {
    /// Entity created for this connection.
    pub entity: EntityId,
    /// Identity established during the handshake.
    pub user: String,
    /// Remote address.
    pub addr: SocketAddr,
    world: Arc<World>,
}

impl ClientSession {
    /// Create the connection's entity, bind the identity and register the
    /// snapshot queue.
    pub async fn admit(
        world: Arc<World>,
        user: String,
        addr: SocketAddr,
        queue: mpsc::Sender<Bytes>,
    ) -> Self {
        let entity = world.create_entity().await;
        world.bind_user(entity, user.clone()).await;
        world.register_client(entity, queue).await;
        info!(entity, %user, %addr, "Client admitted");
        Self {
            entity,
            user,
            addr,
            world,
        }
    }

    /// Decode one inbound message and forward it to the world.
    ///
    /// Waits while the world's input queue is full. Malformed messages are
    /// returned as errors and leave the world untouched.
    pub async fn handle_message(&self, data: &[u8]) -> Result<(), ProtocolError> {
        match ClientMessage::decode(data)? {
            ClientMessage::Input(payload) => {
                if !self.world.has_entity(self.entity).await {
                    warn!(entity = self.entity, "Input for unknown entity dropped");
                    return Ok(());
                }
                self.world
                    .submit_input(Input::from_payload(self.entity, &payload))
                    .await;
            }
            ClientMessage::Other(kind) => {
                debug!(entity = self.entity, %kind, "Ignoring message");
            }
        }
        Ok(())
    }

    /// Unregister the snapshot queue and drop the identity binding.
    /// The entity stays in the world.
    pub async fn close(self) {
        self.world.unregister_client(self.entity).await;
        self.world.unbind_user(self.entity).await;
        info!(entity = self.entity, user = %self.user, addr = %self.addr, "Client disconnected");
    }
}
