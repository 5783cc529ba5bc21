//! CLI / bootstrap (module H): parses `<port> <self_id> <peer_id>...`,
//! initializes logging, constructs one [`Replica`], and drives its event
//! loop until process exit.
//!
//! This binary performs every bit of I/O in the crate: the consensus core
//! (modules A-F) never reads a clock or touches a socket on its own.

use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};

use kvraft::error::CodecError;
use kvraft::message::{self, Body, Envelope, BROADCAST};
use kvraft::replica::Replica;
use kvraft::transport::Transport;

/// A replica in a Raft-based replicated key-value store.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Port of the shared transport router this replica's datagrams flow through.
    port: u16,

    /// This replica's own identifier (conventionally a 4-character string).
    self_id: String,

    /// Identifiers of the other replicas making up the static cluster.
    #[arg(required = true, num_args = 1..)]
    peers: Vec<String>,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let transport = Transport::bind(cli.port).with_context(|| format!("failed to bind transport on port {}", cli.port))?;

    let mut replica = Replica::new(cli.self_id.clone(), cli.peers.clone());
    info!("[{}] starting with peers {:?}", cli.self_id, cli.peers);

    if let Err(e) = transport.send(&Envelope::new(cli.self_id.clone(), BROADCAST, BROADCAST, Body::Hello)) {
        warn!("[{}] failed to send startup hello: {}", cli.self_id, e);
    }

    run(&mut replica, &transport)
}

fn run(replica: &mut Replica, transport: &Transport) -> Result<()> {
    loop {
        match transport.recv() {
            Ok(Some(bytes)) => handle_datagram(replica, transport, &bytes),
            Ok(None) => {}
            Err(e) => warn!("[{}] transport error: {}", replica.state.id, e),
        }

        for out in replica.tick(Instant::now()) {
            send_or_log(transport, &replica.state.id, &out);
        }
    }
}

fn handle_datagram(replica: &mut Replica, transport: &Transport, bytes: &[u8]) {
    match message::decode(bytes) {
        Ok(envelope) => {
            for out in replica.handle_envelope(Instant::now(), envelope) {
                send_or_log(transport, &replica.state.id, &out);
            }
        }
        Err(CodecError::Malformed(e)) => {
            // Noise on the wire is expected (stray/partial datagrams); the
            // protocol is self-healing, so this is never fatal.
            warn!("[{}] dropping malformed datagram: {}", replica.state.id, e);
        }
        Err(CodecError::UnknownType(ty)) => {
            // An unrecognized type from a configured peer means our wire
            // format has drifted from the cluster's; there's nothing sound
            // left to do but abort. A stray datagram from anything else is
            // just ignored.
            let sender_is_peer = message::peek_src(bytes)
                .map(|src| replica.peers().contains(&src))
                .unwrap_or(false);
            if sender_is_peer {
                error!("[{}] fatal: unrecognized message type {:?} from a peer", replica.state.id, ty);
                std::process::exit(1);
            } else {
                warn!("[{}] ignoring unrecognized message type {:?} from non-peer", replica.state.id, ty);
            }
        }
    }
}

fn send_or_log(transport: &Transport, id: &str, envelope: &Envelope) {
    if let Err(e) = transport.send(envelope) {
        warn!("[{}] failed to send {:?}: {}", id, envelope.body, e);
    }
}
