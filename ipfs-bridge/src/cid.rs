//! Content identifier validation.

use crate::errors::NodeError;

/// Length of a CID in its textual form.
pub const CID_SIZE: usize = 46;

/// Checks that `cid` has the fixed textual length.
///
/// This is the only check done on CIDs before they cross into the engine;
/// anything else about their shape is the engine's business.
pub fn validate(cid: &str) -> Result<(), NodeError> {
    if cid.len() == CID_SIZE {
        Ok(())
    } else {
        Err(NodeError::InvalidCid {
            len: cid.len(),
            expected: CID_SIZE,
        })
    }
}

/// Returns true if `cid` has the fixed textual length.
#[must_use]
pub fn is_valid(cid: &str) -> bool {
    cid.len() == CID_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_exact_length() {
        let cid = "QmT78zSuBmuS4z925WZfrqQ1qHaJ56DQaTfyMUF7F8ff5o";
        assert_eq!(cid.len(), CID_SIZE);
        assert!(validate(cid).is_ok());
        assert!(is_valid(cid));
    }

    #[test]
    fn test_rejects_other_lengths() {
        for cid in ["", "Qm", "QmT78zSuBmuS4z925WZfrqQ1qHaJ56DQaTfyMUF7F8ff5", "QmT78zSuBmuS4z925WZfrqQ1qHaJ56DQaTfyMUF7F8ff5oo"] {
            match validate(cid) {
                Err(NodeError::InvalidCid { len, expected }) => {
                    assert_eq!(len, cid.len());
                    assert_eq!(expected, CID_SIZE);
                }
                other => panic!("expected InvalidCid for {cid:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_length_is_measured_in_bytes() {
        // 23 two-byte characters: 46 bytes
        let cid = "é".repeat(23);
        assert!(is_valid(&cid));
    }
}
