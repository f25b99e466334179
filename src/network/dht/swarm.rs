//! libp2p swarm for feed lookups
//!
//! Builds the swarm (TCP/Noise/Yamux, Kademlia, Identify, optional mDNS) and
//! runs it as a single task that owns it. Lookups arrive over a command
//! channel and are answered through oneshot replies once the Kademlia query
//! finishes.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::StreamExt;
use libp2p::swarm::behaviour::toggle::Toggle;
use libp2p::swarm::{NetworkBehaviour, SwarmEvent};
use libp2p::{identify, identity, kad, mdns, noise, tcp, yamux, Multiaddr, PeerId, Swarm, SwarmBuilder};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::config::P2PConfig;
use crate::types::{PublicKey, Record};

/// Combined behaviour for the pinning node
#[derive(NetworkBehaviour)]
pub struct PinnerBehaviour {
    pub kademlia: kad::Behaviour<kad::store::MemoryStore>,
    pub identify: identify::Behaviour,
    pub mdns: Toggle<mdns::tokio::Behaviour>,
}

/// Commands sent to the swarm task
#[derive(Debug)]
pub enum DhtCommand {
    /// Look up the newest record stored under a feed key
    GetRecord {
        key: PublicKey,
        reply: oneshot::Sender<Option<Record>>,
    },
}

/// An in-flight GetRecord query
struct PendingLookup {
    key: PublicKey,
    best: Option<Record>,
    reply: oneshot::Sender<Option<Record>>,
}

impl PendingLookup {
    fn offer(&mut self, record: Record) {
        let newer = self
            .best
            .as_ref()
            .map_or(true, |best| record.is_newer_than(best));
        if newer {
            self.best = Some(record);
        }
    }
}

/// Build the swarm from config.
///
/// Loads or creates the node identity under `data_dir`, starts listening on
/// the configured addresses and seeds Kademlia with the bootstrap nodes.
pub fn build_swarm(config: &P2PConfig, data_dir: &Path) -> Result<Swarm<PinnerBehaviour>> {
    let keypair = load_or_generate_keypair(data_dir)?;
    let local_peer_id = PeerId::from(keypair.public());
    info!(%local_peer_id, "Node identity");

    let query_timeout = config.query_timeout();
    let mdns = if config.mdns_enabled {
        Some(mdns::tokio::Behaviour::new(mdns::Config::default(), local_peer_id).context("mDNS")?)
    } else {
        None
    };

    let mut swarm = SwarmBuilder::with_existing_identity(keypair)
        .with_tokio()
        .with_tcp(
            tcp::Config::default(),
            noise::Config::new,
            yamux::Config::default,
        )
        .context("TCP transport")?
        .with_behaviour(move |key| {
            let peer_id = key.public().to_peer_id();

            let mut kad_config = kad::Config::default();
            kad_config.set_query_timeout(query_timeout);
            let store = kad::store::MemoryStore::new(peer_id);
            let mut kademlia = kad::Behaviour::with_config(peer_id, store, kad_config);
            kademlia.set_mode(Some(kad::Mode::Server));

            let identify = identify::Behaviour::new(
                identify::Config::new("/feed-pinner/id/1.0.0".to_string(), key.public())
                    .with_agent_version(format!("feed-pinner/{}", env!("CARGO_PKG_VERSION"))),
            );

            PinnerBehaviour {
                kademlia,
                identify,
                mdns: Toggle::from(mdns),
            }
        })
        .context("swarm behaviour")?
        .with_swarm_config(|c| c.with_idle_connection_timeout(Duration::from_secs(60)))
        .build();

    for addr_str in &config.listen_addrs {
        let addr: Multiaddr = addr_str
            .parse()
            .with_context(|| format!("invalid listen address: {}", addr_str))?;
        swarm
            .listen_on(addr)
            .with_context(|| format!("failed to listen on {}", addr_str))?;
    }

    let mut bootstrapped = 0usize;
    for node_str in &config.bootstrap_nodes {
        if let Some((peer_id, addr)) = parse_peer_addr(node_str) {
            swarm.behaviour_mut().kademlia.add_address(&peer_id, addr);
            bootstrapped += 1;
            info!(%peer_id, "Added bootstrap node");
        } else {
            warn!(addr = %node_str, "Invalid bootstrap node address, skipping");
        }
    }
    if bootstrapped > 0 {
        if let Err(e) = swarm.behaviour_mut().kademlia.bootstrap() {
            warn!(error = ?e, "Kademlia bootstrap failed");
        }
    }

    Ok(swarm)
}

/// Run the swarm until the command channel closes.
pub async fn run(mut swarm: Swarm<PinnerBehaviour>, mut commands: mpsc::Receiver<DhtCommand>) {
    let mut pending: HashMap<kad::QueryId, PendingLookup> = HashMap::new();

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(DhtCommand::GetRecord { key, reply }) => {
                    let id = swarm
                        .behaviour_mut()
                        .kademlia
                        .get_record(kad::RecordKey::new(key.as_bytes()));
                    debug!(key = %key, ?id, "Started record lookup");
                    pending.insert(id, PendingLookup { key, best: None, reply });
                }
                None => {
                    info!("DHT command channel closed, stopping swarm");
                    break;
                }
            },
            event = swarm.select_next_some() => {
                handle_event(&mut swarm, &mut pending, event);
            }
        }
    }
}

fn handle_event(
    swarm: &mut Swarm<PinnerBehaviour>,
    pending: &mut HashMap<kad::QueryId, PendingLookup>,
    event: SwarmEvent<PinnerBehaviourEvent>,
) {
    match event {
        SwarmEvent::Behaviour(PinnerBehaviourEvent::Kademlia(
            kad::Event::OutboundQueryProgressed {
                id,
                result: kad::QueryResult::GetRecord(result),
                step,
                ..
            },
        )) => {
            let finished = step.last || result.is_err();

            if let Some(lookup) = pending.get_mut(&id) {
                match result {
                    Ok(kad::GetRecordOk::FoundRecord(peer_record)) => {
                        match serde_json::from_slice::<Record>(&peer_record.record.value) {
                            Ok(record) => lookup.offer(record),
                            Err(e) => {
                                warn!(key = %lookup.key, peer = ?peer_record.peer, error = %e, "Undecodable feed record")
                            }
                        }
                    }
                    Ok(kad::GetRecordOk::FinishedWithNoAdditionalRecord { .. }) => {}
                    Err(e) => {
                        debug!(key = %lookup.key, error = ?e, "Lookup ended without a record");
                    }
                }
            }

            if finished {
                if let Some(lookup) = pending.remove(&id) {
                    let _ = lookup.reply.send(lookup.best);
                }
            }
        }

        SwarmEvent::Behaviour(PinnerBehaviourEvent::Mdns(mdns::Event::Discovered(peers))) => {
            for (peer_id, addr) in peers {
                debug!(%peer_id, %addr, "mDNS: peer discovered");
                swarm.behaviour_mut().kademlia.add_address(&peer_id, addr);
            }
        }

        SwarmEvent::Behaviour(PinnerBehaviourEvent::Identify(identify::Event::Received {
            peer_id,
            info,
            ..
        })) => {
            debug!(%peer_id, agent = %info.agent_version, "Identified peer");
            for addr in info.listen_addrs {
                swarm.behaviour_mut().kademlia.add_address(&peer_id, addr);
            }
        }

        SwarmEvent::NewListenAddr { address, .. } => {
            info!(%address, "Listening on");
        }
        SwarmEvent::ConnectionEstablished { peer_id, .. } => {
            debug!(%peer_id, "Connection established");
        }
        SwarmEvent::ConnectionClosed { peer_id, .. } => {
            debug!(%peer_id, "Connection closed");
        }

        _ => {}
    }
}

/// Load an Ed25519 keypair from disk, or generate and persist a new one.
///
/// Stored as protobuf-encoded bytes at `{data_dir}/node_key`.
fn load_or_generate_keypair(data_dir: &Path) -> Result<identity::Keypair> {
    let key_path = data_dir.join("node_key");

    if key_path.exists() {
        let bytes = std::fs::read(&key_path).context("reading node key")?;
        let keypair =
            identity::Keypair::from_protobuf_encoding(&bytes).context("decoding node key")?;
        info!("Loaded existing node identity");
        Ok(keypair)
    } else {
        let keypair = identity::Keypair::generate_ed25519();
        std::fs::create_dir_all(data_dir).context("creating data directory")?;
        let bytes = keypair.to_protobuf_encoding().context("encoding node key")?;
        std::fs::write(&key_path, &bytes).context("writing node key")?;
        info!("Generated new node identity");
        Ok(keypair)
    }
}

/// Split `/ip4/1.2.3.4/tcp/4001/p2p/12D3Koo...` into the peer id and the
/// dialable address without the `/p2p/` suffix.
fn parse_peer_addr(addr_str: &str) -> Option<(PeerId, Multiaddr)> {
    let addr: Multiaddr = addr_str.parse().ok()?;
    let peer_id = addr.iter().find_map(|p| match p {
        libp2p::multiaddr::Protocol::P2p(peer_id) => Some(peer_id),
        _ => None,
    })?;
    let dialable: Multiaddr = addr
        .iter()
        .filter(|p| !matches!(p, libp2p::multiaddr::Protocol::P2p(_)))
        .collect();
    Some((peer_id, dialable))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_parse_peer_addr() {
        let peer_id = PeerId::from(identity::Keypair::generate_ed25519().public());
        let addr = format!("/ip4/10.0.0.5/tcp/4001/p2p/{}", peer_id);

        let (parsed_peer, dialable) = parse_peer_addr(&addr).unwrap();
        assert_eq!(parsed_peer, peer_id);
        assert_eq!(dialable.to_string(), "/ip4/10.0.0.5/tcp/4001");
    }

    #[test]
    fn test_parse_peer_addr_requires_peer_id() {
        assert!(parse_peer_addr("/ip4/10.0.0.5/tcp/4001").is_none());
        assert!(parse_peer_addr("not an address").is_none());
    }

    #[test]
    fn test_keypair_is_persisted() {
        let dir = tempfile::TempDir::new().unwrap();

        let first = load_or_generate_keypair(dir.path()).unwrap();
        let second = load_or_generate_keypair(dir.path()).unwrap();

        assert_eq!(PeerId::from(first.public()), PeerId::from(second.public()));
        assert!(dir.path().join("node_key").exists());
    }

    #[test]
    fn test_pending_lookup_keeps_newest() {
        let (reply, _rx) = oneshot::channel();
        let mut lookup = PendingLookup {
            key: PublicKey::from_bytes([1u8; 32]),
            best: None,
            reply,
        };

        let t = |s| Utc.with_ymd_and_hms(2021, 3, 1, 12, 0, s).unwrap();
        lookup.offer(Record::new(t(5), "b"));
        lookup.offer(Record::new(t(1), "a"));
        assert_eq!(lookup.best.as_ref().unwrap().text, "b");

        lookup.offer(Record::new(t(9), "c"));
        assert_eq!(lookup.best.as_ref().unwrap().text, "c");
    }
}
