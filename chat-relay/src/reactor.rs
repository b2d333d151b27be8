//! The relay's event loop.
//!
//! A single [`Relay`] owns the [`Registry`] and is the only code that mutates
//! it. Reader tasks never touch client state; they push [`Inbound`] events onto
//! one queue that the relay drains. Each turn of the loop:
//!
//! 1. waits until the listener has a connection, the queue has an event, or
//!    the idle timeout fires;
//! 2. admits at most one new connection;
//! 3. moves every queued event into its client's slot;
//! 4. services clients in roster order.

use std::{future::Future, io, net::SocketAddr};

use anyhow::Result;
use bytes::Bytes;
use tokio::{net::TcpStream, select, sync::mpsc, time};
use tracing::{debug, info, trace, warn};

use crate::{
    command::{self, Outcome},
    config::RelayConfig,
    protocol,
    registry::{ClientKey, Registry},
    transport::{self, ConnectionId, Inbound, Listener, ReadEvent, TransportError},
};

pub struct Relay {
    listener: Listener,
    registry: Registry,
    events_tx: mpsc::UnboundedSender<Inbound>,
    events_rx: mpsc::UnboundedReceiver<Inbound>,
    config: RelayConfig,
    banner: Bytes,
    next_connection: u64,
}

/// Why the wait returned.
enum Wakeup {
    Idle,
    Ready {
        accepted: Option<(TcpStream, SocketAddr)>,
    },
}

enum Woken {
    Accepted((TcpStream, SocketAddr)),
    Event(Inbound),
}

impl Relay {
    /// Binds the listener. Failing here is fatal for the server.
    pub async fn bind(config: RelayConfig) -> Result<Self, TransportError> {
        let listener = transport::listen(config.listen).await?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let banner = Bytes::from(protocol::banner(&config.greeting));

        Ok(Self {
            listener,
            registry: Registry::new(),
            events_tx,
            events_rx,
            config,
            banner,
            next_connection: 0,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run_until<F>(mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            let wakeup = select! {
                _ = &mut shutdown => break,
                wakeup = self.wait() => wakeup,
            };
            self.dispatch(wakeup);
        }

        let removed = self.registry.drain();
        info!(clients = removed, "relay shutting down");
        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }

    /// Blocks until something is ready, then collects every event already
    /// queued so one turn sees everything that arrived before it woke.
    async fn wait(&mut self) -> Wakeup {
        let woken = select! {
            biased;
            accepted = self.listener.accept() => Woken::Accepted(accepted),
            Some(inbound) = self.events_rx.recv() => Woken::Event(inbound),
            _ = time::sleep(self.config.idle_timeout()) => return Wakeup::Idle,
        };

        let accepted = match woken {
            Woken::Accepted(accepted) => Some(accepted),
            Woken::Event(inbound) => {
                self.registry.mark_ready(inbound);
                None
            }
        };
        while let Ok(inbound) = self.events_rx.try_recv() {
            self.registry.mark_ready(inbound);
        }

        Wakeup::Ready { accepted }
    }

    fn dispatch(&mut self, wakeup: Wakeup) {
        let accepted = match wakeup {
            Wakeup::Idle => {
                self.housekeeping();
                return;
            }
            Wakeup::Ready { accepted } => accepted,
        };

        if let Some((stream, peer)) = accepted {
            self.admit(stream, peer);
        }

        let mut cursor = self.registry.roster_front();
        while let Some(key) = cursor {
            cursor = self.registry.roster_next(key);
            self.service(key);
        }
    }

    /// Runs when a wait times out with nothing ready.
    fn housekeeping(&mut self) {
        trace!(clients = self.registry.len(), "idle wake-up");
    }

    fn admit(&mut self, stream: TcpStream, peer: SocketAddr) {
        if self.registry.len() >= self.config.max_clients {
            warn!(%peer, limit = self.config.max_clients, "client limit reached; refusing connection");
            return;
        }

        self.next_connection += 1;
        let id = ConnectionId::new(self.next_connection);
        let connection = transport::spawn_connection(
            stream,
            id,
            self.events_tx.clone(),
            self.config.max_line_length,
        );
        let key = self.registry.register(connection);

        let Some(client) = self.registry.client(key) else {
            return;
        };
        info!(%peer, name = client.name(), slot = client.slot(), "client connected");
        if let Err(err) = client.send(self.banner.clone()) {
            debug!(error = %err, "failed to send banner");
        }
    }

    /// Handles the events queued for one client. Anything left after the
    /// client departs is discarded with it.
    fn service(&mut self, key: ClientKey) {
        for event in self.registry.take_ready(key) {
            match event {
                ReadEvent::Line(line) => {
                    if command::execute(&mut self.registry, key, &line) == Outcome::Departed {
                        break;
                    }
                }
                ReadEvent::Closed => {
                    if let Some(name) = self.registry.remove(key) {
                        info!(%name, "client disconnected");
                    }
                    break;
                }
            }
        }
    }
}
