/// Key layout and encoding utilities for Fjall partitions
///
/// Partition structure:
/// - `schedules`: sched:{id:016} -> Schedule (JSON)
/// - `executions`: exec:{schedule_id:016}:{id:016} -> Execution (JSON)
/// - `buffers`: buf:{id:016} -> BufferConfig (JSON)
/// - `rules`: rule:{id:016} -> ForwardingConfig (JSON)
/// - `received`: recv:{id:016} -> ReceivedMessage (JSON)
/// - `forwarded`: fwd:{id:016} -> ForwardedMessage (JSON)
/// - `metadata`: meta:{key} -> value (string)
///
/// Ids are zero-padded so lexicographic order matches numeric order.

/// Entity kinds that own an id sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sequence {
    Schedule,
    Execution,
    Buffer,
    Rule,
    Received,
    Forwarded,
}

impl Sequence {
    pub fn name(&self) -> &'static str {
        match self {
            Sequence::Schedule => "schedule",
            Sequence::Execution => "execution",
            Sequence::Buffer => "buffer",
            Sequence::Rule => "rule",
            Sequence::Received => "received",
            Sequence::Forwarded => "forwarded",
        }
    }
}

pub fn encode_schedule_key(id: u64) -> Vec<u8> {
    format!("sched:{:016}", id).into_bytes()
}

/// Encode an execution key: exec:{schedule_id:016}:{id:016}
pub fn encode_execution_key(schedule_id: u64, id: u64) -> Vec<u8> {
    format!("exec:{:016}:{:016}", schedule_id, id).into_bytes()
}

/// Prefix covering every execution of one schedule
pub fn encode_execution_prefix(schedule_id: u64) -> Vec<u8> {
    format!("exec:{:016}:", schedule_id).into_bytes()
}

/// Decode an execution key -> (schedule_id, id)
pub fn decode_execution_key(key: &[u8]) -> Option<(u64, u64)> {
    let key_str = std::str::from_utf8(key).ok()?;
    let (schedule, id) = key_str.strip_prefix("exec:")?.split_once(':')?;
    Some((schedule.parse().ok()?, id.parse().ok()?))
}

pub fn encode_buffer_key(id: u64) -> Vec<u8> {
    format!("buf:{:016}", id).into_bytes()
}

pub fn encode_rule_key(id: u64) -> Vec<u8> {
    format!("rule:{:016}", id).into_bytes()
}

pub fn encode_received_key(id: u64) -> Vec<u8> {
    format!("recv:{:016}", id).into_bytes()
}

pub fn encode_forwarded_key(id: u64) -> Vec<u8> {
    format!("fwd:{:016}", id).into_bytes()
}

/// Encode a metadata key: meta:{key}
pub fn encode_meta_key(key: &str) -> Vec<u8> {
    format!("meta:{}", key).into_bytes()
}

/// Encode the counter key for an id sequence: meta:seq:{kind}
pub fn encode_sequence_key(sequence: Sequence) -> Vec<u8> {
    encode_meta_key(&format!("seq:{}", sequence.name()))
}

/// Decode a single-id key of the form `{prefix}:{id:016}`
pub fn decode_id_key(key: &[u8], prefix: &str) -> Option<u64> {
    let key_str = std::str::from_utf8(key).ok()?;
    key_str
        .strip_prefix(prefix)?
        .strip_prefix(':')?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_key_encoding() {
        let key = encode_schedule_key(42);
        assert_eq!(key, b"sched:0000000000000042");
        assert_eq!(decode_id_key(&key, "sched"), Some(42));
        assert_eq!(decode_id_key(&key, "buf"), None);
    }

    #[test]
    fn test_execution_key_encoding() {
        let key = encode_execution_key(3, 17);
        assert_eq!(key, b"exec:0000000000000003:0000000000000017");
        assert_eq!(decode_execution_key(&key), Some((3, 17)));
        assert!(key.starts_with(&encode_execution_prefix(3)));
        assert!(!key.starts_with(&encode_execution_prefix(30)));
    }

    #[test]
    fn test_padded_keys_sort_numerically() {
        assert!(encode_rule_key(9) < encode_rule_key(10));
        assert!(encode_received_key(99) < encode_received_key(100));
    }

    #[test]
    fn test_sequence_key_encoding() {
        assert_eq!(encode_sequence_key(Sequence::Schedule), b"meta:seq:schedule");
        assert_eq!(encode_sequence_key(Sequence::Forwarded), b"meta:seq:forwarded");
        assert_eq!(encode_meta_key("last_prune"), b"meta:last_prune");
    }
}
