//! GTID sets for both replication dialects
//!
//! MySQL tracks executed transactions as uuid -> interval list,
//! MariaDB as domain -> (server, sequence)
use crate::error::{Error, Result};
use bytes::{Bytes, BytesMut};
use linked_hash_map::LinkedHashMap;
use myrepl_bytes::{ReadBytesExt, ReadFromBytes, WriteBytesExt, WriteToBytes};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// a half-open interval [start, stop) of transaction numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub start: u64,
    pub stop: u64,
}

impl Interval {
    fn parse(s: &str) -> Result<Self> {
        let mut parts = s.splitn(2, '-');
        // splitn always yields at least one item
        let start: u64 = parts.next().unwrap().parse()?;
        let interval = match parts.next() {
            Some(end) => {
                let end: u64 = end.parse()?;
                if end < start {
                    return Err(Error::GtidParse(format!("invalid interval: {}", s)));
                }
                Interval {
                    start,
                    stop: end + 1,
                }
            }
            None => Interval {
                start,
                stop: start + 1,
            },
        };
        Ok(interval)
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.stop == self.start + 1 {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.stop - 1)
        }
    }
}

/// the intervals executed for one source uuid, sorted and coalesced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UuidSet {
    pub sid: Uuid,
    pub intervals: Vec<Interval>,
}

impl UuidSet {
    fn new(sid: Uuid) -> Self {
        UuidSet {
            sid,
            intervals: Vec::new(),
        }
    }

    /// insert an interval, keeping the list sorted and maximally merged
    pub fn add_interval(&mut self, iv: Interval) {
        self.intervals.push(iv);
        self.normalize();
    }

    fn normalize(&mut self) {
        self.intervals.sort_by_key(|iv| iv.start);
        let mut merged: Vec<Interval> = Vec::with_capacity(self.intervals.len());
        for iv in self.intervals.drain(..) {
            match merged.last_mut() {
                Some(last) if iv.start <= last.stop => {
                    last.stop = std::cmp::max(last.stop, iv.stop);
                }
                _ => merged.push(iv),
            }
        }
        self.intervals = merged;
    }

    pub fn contains_gno(&self, gno: u64) -> bool {
        self.intervals
            .iter()
            .any(|iv| gno >= iv.start && gno < iv.stop)
    }

    fn contains(&self, other: &UuidSet) -> bool {
        other.intervals.iter().all(|o| {
            self.intervals
                .iter()
                .any(|iv| o.start >= iv.start && o.stop <= iv.stop)
        })
    }
}

impl fmt::Display for UuidSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sid)?;
        for iv in &self.intervals {
            write!(f, ":{}", iv)?;
        }
        Ok(())
    }
}

/// a MySQL GTID set
///
/// text form: `uuid:1-100:200-300,uuid:7`
/// wire form: u64 uuid count, then per uuid 16 raw bytes,
/// u64 interval count and [start, stop) as u64 pairs
#[derive(Debug, Clone, Default)]
pub struct GtidSet {
    sets: LinkedHashMap<Uuid, UuidSet>,
}

impl GtidSet {
    pub fn new() -> Self {
        GtidSet {
            sets: LinkedHashMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn uuid_sets(&self) -> impl Iterator<Item = &UuidSet> {
        self.sets.values()
    }

    /// record one executed transaction
    pub fn add_gtid(&mut self, sid: Uuid, gno: u64) {
        self.sets
            .entry(sid)
            .or_insert_with(|| UuidSet::new(sid))
            .add_interval(Interval {
                start: gno,
                stop: gno + 1,
            });
    }

    pub fn add_interval(&mut self, sid: Uuid, iv: Interval) {
        self.sets
            .entry(sid)
            .or_insert_with(|| UuidSet::new(sid))
            .add_interval(iv);
    }

    pub fn contains_gtid(&self, sid: &Uuid, gno: u64) -> bool {
        self.sets.get(sid).map_or(false, |us| us.contains_gno(gno))
    }

    /// set-wise containment
    pub fn contains(&self, other: &GtidSet) -> bool {
        other.sets.iter().all(|(sid, o)| {
            self.sets.get(sid).map_or(false, |us| us.contains(o))
        })
    }

    /// union in place
    pub fn merge(&mut self, other: &GtidSet) {
        for (sid, o) in other.sets.iter() {
            for iv in &o.intervals {
                self.add_interval(*sid, *iv);
            }
        }
    }

    pub fn equal(&self, other: &GtidSet) -> bool {
        self.contains(other) && other.contains(self)
    }

    /// wire length in bytes
    pub fn encoded_len(&self) -> usize {
        8 + self
            .sets
            .values()
            .map(|us| 16 + 8 + 16 * us.intervals.len())
            .sum::<usize>()
    }

    pub fn encode(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(self.encoded_len());
        // infallible on a growable buffer
        self.clone().write_to(&mut out).unwrap();
        out.freeze()
    }
}

impl WriteToBytes for GtidSet {
    fn write_to(self, out: &mut BytesMut) -> myrepl_bytes::error::Result<usize> {
        let mut len = 0;
        len += out.write_le_u64(self.sets.len() as u64)?;
        for us in self.sets.values() {
            len += out.write_bytes(us.sid.as_bytes())?;
            len += out.write_le_u64(us.intervals.len() as u64)?;
            for iv in &us.intervals {
                len += out.write_le_u64(iv.start)?;
                len += out.write_le_u64(iv.stop)?;
            }
        }
        Ok(len)
    }
}

impl ReadFromBytes for GtidSet {
    fn read_from(input: &mut Bytes) -> myrepl_bytes::error::Result<Self> {
        use myrepl_bytes::error::Error as PError;

        let n_sids = input.read_le_u64()?;
        let mut sets = LinkedHashMap::with_capacity(n_sids as usize);
        for _ in 0..n_sids {
            let raw = input.read_len(16)?;
            let mut sid_bytes = [0u8; 16];
            sid_bytes.copy_from_slice(raw.as_ref());
            let sid = Uuid::from_bytes(sid_bytes);
            let n_intervals = input.read_le_u64()?;
            let mut us = UuidSet::new(sid);
            for _ in 0..n_intervals {
                let start = input.read_le_u64()?;
                let stop = input.read_le_u64()?;
                if stop <= start {
                    return Err(PError::ConstraintError(format!(
                        "invalid gtid interval: start={}, stop={}",
                        start, stop
                    )));
                }
                us.intervals.push(Interval { start, stop });
            }
            us.normalize();
            sets.insert(sid, us);
        }
        Ok(GtidSet { sets })
    }
}

impl FromStr for GtidSet {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut set = GtidSet::new();
        if s.trim().is_empty() {
            return Ok(set);
        }
        for part in s.split(',') {
            let part = part.trim();
            let mut pieces = part.split(':');
            let sid = pieces
                .next()
                .filter(|p| !p.is_empty())
                .ok_or_else(|| Error::GtidParse(format!("invalid gtid set: {}", part)))?;
            let sid =
                Uuid::parse_str(sid).map_err(|e| Error::GtidParse(format!("{}: {}", sid, e)))?;
            let mut any = false;
            for iv in pieces {
                set.add_interval(sid, Interval::parse(iv)?);
                any = true;
            }
            if !any {
                return Err(Error::GtidParse(format!("missing interval: {}", part)));
            }
        }
        Ok(set)
    }
}

impl fmt::Display for GtidSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for us in self.sets.values() {
            if !first {
                write!(f, ",")?;
            }
            write!(f, "{}", us)?;
            first = false;
        }
        Ok(())
    }
}

/// one MariaDB GTID: domain-server-sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MariadbGtid {
    pub domain_id: u32,
    pub server_id: u32,
    pub seq_no: u64,
}

impl FromStr for MariadbGtid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.trim().split('-').collect();
        if parts.len() != 3 {
            return Err(Error::GtidParse(format!("invalid mariadb gtid: {}", s)));
        }
        Ok(MariadbGtid {
            domain_id: parts[0].parse()?,
            server_id: parts[1].parse()?,
            seq_no: parts[2].parse()?,
        })
    }
}

impl fmt::Display for MariadbGtid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.domain_id, self.server_id, self.seq_no)
    }
}

/// a MariaDB GTID set: at most one entry per domain
///
/// text form: `0-1-100,1-2-50`
/// wire form: u32 domain count, then per domain
/// u32 domain, u32 server, u64 sequence
#[derive(Debug, Clone, Default)]
pub struct MariadbGtidSet {
    sets: LinkedHashMap<u32, MariadbGtid>,
}

impl MariadbGtidSet {
    pub fn new() -> Self {
        MariadbGtidSet {
            sets: LinkedHashMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn gtids(&self) -> impl Iterator<Item = &MariadbGtid> {
        self.sets.values()
    }

    pub fn get(&self, domain_id: u32) -> Option<&MariadbGtid> {
        self.sets.get(&domain_id)
    }

    /// record a gtid, replacing the domain entry
    ///
    /// the stream is trusted: sequence numbers are monotonic per
    /// domain on a sane master, so the newest entry always wins
    pub fn update(&mut self, gtid: MariadbGtid) {
        self.sets.insert(gtid.domain_id, gtid);
    }

    pub fn contains(&self, other: &MariadbGtidSet) -> bool {
        other.sets.iter().all(|(domain, o)| {
            self.sets
                .get(domain)
                .map_or(false, |g| g.seq_no >= o.seq_no)
        })
    }

    /// union in place, keeping the higher sequence per domain
    pub fn merge(&mut self, other: &MariadbGtidSet) {
        for (domain, o) in other.sets.iter() {
            match self.sets.get_mut(domain) {
                Some(g) if g.seq_no >= o.seq_no => (),
                _ => {
                    self.sets.insert(*domain, *o);
                }
            }
        }
    }

    pub fn equal(&self, other: &MariadbGtidSet) -> bool {
        self.contains(other) && other.contains(self)
    }

    pub fn encoded_len(&self) -> usize {
        4 + self.sets.len() * 16
    }

    pub fn encode(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(self.encoded_len());
        self.clone().write_to(&mut out).unwrap();
        out.freeze()
    }
}

impl WriteToBytes for MariadbGtidSet {
    fn write_to(self, out: &mut BytesMut) -> myrepl_bytes::error::Result<usize> {
        let mut len = 0;
        len += out.write_le_u32(self.sets.len() as u32)?;
        for g in self.sets.values() {
            len += out.write_le_u32(g.domain_id)?;
            len += out.write_le_u32(g.server_id)?;
            len += out.write_le_u64(g.seq_no)?;
        }
        Ok(len)
    }
}

impl ReadFromBytes for MariadbGtidSet {
    fn read_from(input: &mut Bytes) -> myrepl_bytes::error::Result<Self> {
        let n_domains = input.read_le_u32()?;
        let mut sets = LinkedHashMap::with_capacity(n_domains as usize);
        for _ in 0..n_domains {
            let domain_id = input.read_le_u32()?;
            let server_id = input.read_le_u32()?;
            let seq_no = input.read_le_u64()?;
            sets.insert(
                domain_id,
                MariadbGtid {
                    domain_id,
                    server_id,
                    seq_no,
                },
            );
        }
        Ok(MariadbGtidSet { sets })
    }
}

impl FromStr for MariadbGtidSet {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut set = MariadbGtidSet::new();
        if s.trim().is_empty() {
            return Ok(set);
        }
        for part in s.split(',') {
            set.update(part.parse()?);
        }
        Ok(set)
    }
}

impl fmt::Display for MariadbGtidSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for g in self.sets.values() {
            if !first {
                write!(f, ",")?;
            }
            write!(f, "{}", g)?;
            first = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_serialize_identity() {
        let s = "de278ad0-2106-11e4-9f8e-6edd0ca20947:1-2";
        let set: GtidSet = s.parse().unwrap();
        assert_eq!(s, set.to_string());
        let us = set.uuid_sets().next().unwrap();
        assert_eq!(vec![Interval { start: 1, stop: 3 }], us.intervals);
    }

    #[test]
    fn test_encoded_len() {
        let set: GtidSet = "de278ad0-2106-11e4-9f8e-6edd0ca20947:1-2".parse().unwrap();
        assert_eq!(48, set.encoded_len());
        let encoded = set.encode();
        assert_eq!(48, encoded.len());
        let decoded = GtidSet::read_from(&mut encoded.clone()).unwrap();
        assert!(set.equal(&decoded));
    }

    #[test]
    fn test_interval_coalescing() {
        let set: GtidSet = "de278ad0-2106-11e4-9f8e-6edd0ca20947:1-5:6-10:20"
            .parse()
            .unwrap();
        assert_eq!(
            "de278ad0-2106-11e4-9f8e-6edd0ca20947:1-10:20",
            set.to_string()
        );
    }

    #[test]
    fn test_uuid_lowercased() {
        let set: GtidSet = "DE278AD0-2106-11E4-9F8E-6EDD0CA20947:1-2".parse().unwrap();
        assert_eq!(
            "de278ad0-2106-11e4-9f8e-6edd0ca20947:1-2",
            set.to_string()
        );
    }

    #[test]
    fn test_contains_laws() {
        let a: GtidSet = "de278ad0-2106-11e4-9f8e-6edd0ca20947:1-100".parse().unwrap();
        let b: GtidSet = "de278ad0-2106-11e4-9f8e-6edd0ca20947:50-200,11111111-2106-11e4-9f8e-6edd0ca20947:1"
            .parse()
            .unwrap();
        // reflexive
        assert!(a.contains(&a));
        // union contains both operands
        let mut ab = a.clone();
        ab.merge(&b);
        assert!(ab.contains(&a));
        assert!(ab.contains(&b));
        // commutative
        let mut ba = b.clone();
        ba.merge(&a);
        assert!(ab.equal(&ba));
        assert_eq!(
            "de278ad0-2106-11e4-9f8e-6edd0ca20947:1-200,11111111-2106-11e4-9f8e-6edd0ca20947:1",
            ab.to_string()
        );
    }

    #[test]
    fn test_union_associative() {
        let a: GtidSet = "de278ad0-2106-11e4-9f8e-6edd0ca20947:1-10".parse().unwrap();
        let b: GtidSet = "de278ad0-2106-11e4-9f8e-6edd0ca20947:5-20".parse().unwrap();
        let c: GtidSet = "de278ad0-2106-11e4-9f8e-6edd0ca20947:30".parse().unwrap();
        let mut ab_c = a.clone();
        ab_c.merge(&b);
        ab_c.merge(&c);
        let mut bc = b.clone();
        bc.merge(&c);
        let mut a_bc = a.clone();
        a_bc.merge(&bc);
        assert!(ab_c.equal(&a_bc));
    }

    #[test]
    fn test_add_gtid_growth() {
        let mut set = GtidSet::new();
        let sid = Uuid::parse_str("de278ad0-2106-11e4-9f8e-6edd0ca20947").unwrap();
        set.add_gtid(sid, 1);
        set.add_gtid(sid, 2);
        set.add_gtid(sid, 4);
        assert_eq!("de278ad0-2106-11e4-9f8e-6edd0ca20947:1-2:4", set.to_string());
        assert!(set.contains_gtid(&sid, 2));
        assert!(!set.contains_gtid(&sid, 3));
        set.add_gtid(sid, 3);
        assert_eq!("de278ad0-2106-11e4-9f8e-6edd0ca20947:1-4", set.to_string());
    }

    #[test]
    fn test_parse_errors() {
        assert!("not-a-uuid:1-2".parse::<GtidSet>().is_err());
        assert!("de278ad0-2106-11e4-9f8e-6edd0ca20947".parse::<GtidSet>().is_err());
        assert!("de278ad0-2106-11e4-9f8e-6edd0ca20947:5-2"
            .parse::<GtidSet>()
            .is_err());
    }

    #[test]
    fn test_mariadb_parse_serialize() {
        let s = "0-1-100,1-2-50";
        let set: MariadbGtidSet = s.parse().unwrap();
        assert_eq!(s, set.to_string());
        assert_eq!(100, set.get(0).unwrap().seq_no);
    }

    #[test]
    fn test_mariadb_replace_on_update() {
        let mut set: MariadbGtidSet = "0-1-100".parse().unwrap();
        set.update("0-2-200".parse().unwrap());
        assert_eq!("0-2-200", set.to_string());
    }

    #[test]
    fn test_mariadb_encode_roundtrip() {
        let set: MariadbGtidSet = "0-1-100,1-2-50".parse().unwrap();
        assert_eq!(4 + 2 * 16, set.encoded_len());
        let encoded = set.encode();
        assert_eq!(set.encoded_len(), encoded.len());
        let decoded = MariadbGtidSet::read_from(&mut encoded.clone()).unwrap();
        assert!(set.equal(&decoded));
    }

    #[test]
    fn test_mariadb_merge() {
        let mut a: MariadbGtidSet = "0-1-100".parse().unwrap();
        let b: MariadbGtidSet = "0-1-50,1-1-7".parse().unwrap();
        a.merge(&b);
        assert_eq!("0-1-100,1-1-7", a.to_string());
        assert!(a.contains(&b));
    }
}
