// SPDX-License-Identifier: MIT OR Apache-2.0

//! DNS message construction and parsing for the mDNS responder.
//!
//! Queries are PTR questions for the service name. Responses announce one
//! instance per peer: a PTR record pointing the service at the instance, an
//! SRV record carrying the port and an A record per announced IPv4 address.
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::str::FromStr;

use hearth_core::ids::PeerId;
use hickory_proto::op::{Message, MessageType, Query};
use hickory_proto::rr::{DNSClass, Name, RData, Record, RecordType, rdata};
use tracing::{debug, trace};

/// Announced service type, IPv4 answers only.
pub const SERVICE_TYPE: &str = "_anytype._tcp.local.";

const RECORD_TTL: u32 = 60;

/// What this node announces about itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerAnnouncement {
    pub peer_id: PeerId,
    pub port: u16,
    pub ips: Vec<Ipv4Addr>,
}

#[derive(Debug)]
pub enum MulticastDnsMessage {
    /// A PTR question for a service name.
    Query(Name),

    /// Service answers, one announcement per instance.
    Response(Vec<PeerAnnouncement>),
}

pub fn service_name() -> Name {
    Name::from_str(SERVICE_TYPE).expect("static service name parses")
}

pub fn make_query(service: &Name) -> Message {
    let mut msg = Message::new();
    msg.set_message_type(MessageType::Query);
    let mut query = Query::new();
    query.set_query_class(DNSClass::IN);
    query.set_query_type(RecordType::PTR);
    query.set_name(service.clone());
    msg.add_query(query);
    msg
}

pub fn make_response(service: &Name, announcement: &PeerAnnouncement) -> Message {
    let mut msg = Message::new();
    msg.set_message_type(MessageType::Response);
    msg.set_authoritative(true);

    let instance_label = announcement.peer_id.to_hex();
    let instance = Name::from_str(&instance_label)
        .expect("hex label parses")
        .append_domain(service)
        .expect("instance name fits");
    let target =
        Name::from_str(&format!("{instance_label}.local.")).expect("hex target name parses");

    msg.add_answer(Record::from_rdata(
        service.clone(),
        RECORD_TTL,
        RData::PTR(rdata::PTR(instance.clone())),
    ));
    msg.add_answer(Record::from_rdata(
        instance,
        RECORD_TTL,
        RData::SRV(rdata::SRV::new(0, 0, announcement.port, target.clone())),
    ));
    for ip in &announcement.ips {
        msg.add_additional(Record::from_rdata(
            target.clone(),
            RECORD_TTL,
            RData::A(rdata::A::from(*ip)),
        ));
    }

    msg
}

pub fn parse_message(bytes: &[u8]) -> Option<MulticastDnsMessage> {
    let message = match Message::from_vec(bytes) {
        Ok(message) => message,
        Err(err) => {
            debug!("undecodable mdns packet: {err}");
            return None;
        }
    };

    parse_query(&message).or_else(|| parse_response(&message))
}

fn parse_query(message: &Message) -> Option<MulticastDnsMessage> {
    for query in message.queries() {
        if query.query_class() != DNSClass::IN {
            trace!("mdns query with wrong class {}", query.query_class());
            continue;
        }
        if query.query_type() != RecordType::PTR {
            trace!("mdns query with wrong type {}", query.query_type());
            continue;
        }
        return Some(MulticastDnsMessage::Query(query.name().clone()));
    }

    None
}

fn parse_response(message: &Message) -> Option<MulticastDnsMessage> {
    // Instance -> (target, port) from SRV answers.
    let mut targets: BTreeMap<Name, (PeerId, u16)> = BTreeMap::new();
    for answer in message.answers() {
        if answer.dns_class() != DNSClass::IN {
            trace!("mdns answer with wrong class {:?}", answer.dns_class());
            continue;
        }
        let Some(RData::SRV(srv)) = answer.data() else {
            continue;
        };
        let Some(label) = answer.name().iter().next() else {
            continue;
        };
        let Ok(peer_id) = std::str::from_utf8(label)
            .map_err(|_| ())
            .and_then(|label| PeerId::from_str(label).map_err(|_| ()))
        else {
            debug!("mdns answer with invalid instance label {label:?}");
            continue;
        };
        targets.insert(srv.target().clone(), (peer_id, srv.port()));
    }

    let mut peers: BTreeMap<PeerId, PeerAnnouncement> = BTreeMap::new();
    for additional in message.answers().iter().chain(message.additionals()) {
        let Some(RData::A(a)) = additional.data() else {
            continue;
        };
        let Some((peer_id, port)) = targets.get(additional.name()) else {
            trace!("mdns address record without srv target {}", additional.name());
            continue;
        };
        peers
            .entry(*peer_id)
            .or_insert_with(|| PeerAnnouncement {
                peer_id: *peer_id,
                port: *port,
                ips: Vec::new(),
            })
            .ips
            .push(a.0);
    }

    if peers.is_empty() {
        return None;
    }

    let announcements = peers
        .into_values()
        .map(|mut announcement| {
            announcement.ips.sort_unstable();
            announcement.ips.dedup();
            announcement
        })
        .collect();
    Some(MulticastDnsMessage::Response(announcements))
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use assert_matches::assert_matches;
    use hearth_core::identity::PrivateKey;
    use hearth_core::ids::PeerId;
    use hickory_proto::serialize::binary::BinEncodable;

    use super::{
        MulticastDnsMessage, PeerAnnouncement, make_query, make_response, parse_message,
        service_name,
    };

    fn announcement() -> PeerAnnouncement {
        PeerAnnouncement {
            peer_id: PeerId::from(PrivateKey::new().public_key()),
            port: 4006,
            ips: vec![Ipv4Addr::new(192, 168, 1, 7), Ipv4Addr::new(10, 0, 0, 3)],
        }
    }

    #[test]
    fn queries_round_trip() {
        let bytes = make_query(&service_name()).to_bytes().unwrap();
        let parsed = parse_message(&bytes);
        assert_matches!(parsed, Some(MulticastDnsMessage::Query(name)) => {
            assert_eq!(name, service_name());
        });
    }

    #[test]
    fn responses_round_trip() {
        let announcement = announcement();
        let bytes = make_response(&service_name(), &announcement)
            .to_bytes()
            .unwrap();

        let parsed = parse_message(&bytes);
        assert_matches!(parsed, Some(MulticastDnsMessage::Response(peers)) => {
            assert_eq!(peers.len(), 1);
            assert_eq!(peers[0].peer_id, announcement.peer_id);
            assert_eq!(peers[0].port, announcement.port);
            // Parsed addresses are sorted and deduplicated.
            let mut expected = announcement.ips.clone();
            expected.sort_unstable();
            assert_eq!(peers[0].ips, expected);
        });
    }

    #[test]
    fn garbage_is_ignored() {
        assert_matches!(parse_message(b"certainly not dns"), None);
    }
}
