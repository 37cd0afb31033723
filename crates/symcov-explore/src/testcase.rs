//! Generated test cases.

use serde::{Deserialize, Serialize};
use std::fmt;
use symcov_engine::BlockId;

/// A concrete input produced for one exploration target.
///
/// `input == None` means a path to the target exists but the program has
/// no input channel to concretize: reaching the target needs no external
/// input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    /// Unique ID within a session; assigned when the case joins the corpus.
    pub id: u64,
    /// Block the case was generated for.
    pub target: BlockId,
    #[serde(default, with = "hex_input")]
    pub input: Option<Vec<u8>>,
}

impl TestCase {
    pub fn new(target: BlockId, input: Option<Vec<u8>>) -> Self {
        Self {
            id: 0,
            target,
            input,
        }
    }

    pub fn input_hex(&self) -> Option<String> {
        self.input.as_deref().map(hex::encode)
    }

    /// File name used when the input is written to disk.
    pub fn file_name(&self) -> String {
        format!("case_{}_{:x}.bin", self.id, self.target.addr())
    }
}

impl fmt::Display for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.input_hex() {
            Some(hex) if hex.is_empty() => write!(f, "#{} -> {}: <empty input>", self.id, self.target),
            Some(hex) => write!(f, "#{} -> {}: {}", self.id, self.target, hex),
            None => write!(f, "#{} -> {}: <no input channel>", self.id, self.target),
        }
    }
}

/// Inputs are stored as hex strings so case indexes stay readable.
mod hex_input {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(input: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match input {
            Some(bytes) => s.serialize_some(&hex::encode(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(d)?
            .map(|h| hex::decode(h).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let mut case = TestCase::new(BlockId(0x108), Some(b"\x41\x00".to_vec()));
        case.id = 3;
        assert_eq!(case.to_string(), "#3 -> 0x108: 4100");

        let no_channel = TestCase::new(BlockId(0x104), None);
        assert_eq!(no_channel.to_string(), "#0 -> 0x104: <no input channel>");
    }

    #[test]
    fn test_file_name() {
        let mut case = TestCase::new(BlockId(0x4010), Some(vec![1]));
        case.id = 7;
        assert_eq!(case.file_name(), "case_7_4010.bin");
    }

    #[test]
    fn test_serde_uses_hex() {
        let case = TestCase::new(BlockId(0x108), Some(b"\x41\x00".to_vec()));
        let json = serde_json::to_string(&case).unwrap();
        assert!(json.contains("\"input\":\"4100\""));
        assert!(json.contains("\"target\":\"0x108\""));

        let back: TestCase = serde_json::from_str(&json).unwrap();
        assert_eq!(back, case);
    }

    #[test]
    fn test_serde_absent_input() {
        let case = TestCase::new(BlockId(0x104), None);
        let json = serde_json::to_string(&case).unwrap();
        let back: TestCase = serde_json::from_str(&json).unwrap();
        assert_eq!(back.input, None);

        let missing: TestCase = serde_json::from_str(r#"{"id":1,"target":"0x104"}"#).unwrap();
        assert_eq!(missing.input, None);
    }

    #[test]
    fn test_serde_rejects_bad_hex() {
        let result: Result<TestCase, _> =
            serde_json::from_str(r#"{"id":1,"target":"0x104","input":"zz"}"#);
        assert!(result.is_err());
    }
}
