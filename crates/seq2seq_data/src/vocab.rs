use crate::error::DataError;
use anyhow::Result;
use serde::{Deserialize, Serialize};

/// A `Vocabulary` exposes the distinguished token ids the batching layer
/// relies on. Dictionary loading and symbol lookup live elsewhere; this crate
/// only ever needs the special ids.
pub trait Vocabulary {
    fn pad(&self) -> i64;
    fn eos(&self) -> i64;
    fn unk(&self) -> i64;

    /// Beginning-of-sentence id. Not used by collation.
    fn bos(&self) -> i64 {
        0
    }
}

/// Plain special-token table.
///
/// Defaults follow the usual translation dictionary layout:
/// `<s>` = 0, `<pad>` = 1, `</s>` = 2, `<unk>` = 3.
///
/// # Example
/// ```ignore
/// let vocab: SpecialTokens = serde_json::from_str(r#"{"pad": 0, "eos": 1}"#)?;
/// assert_eq!(vocab.unk, 3);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpecialTokens {
    pub bos: i64,
    pub pad: i64,
    pub eos: i64,
    pub unk: i64,
}

impl Default for SpecialTokens {
    fn default() -> Self {
        Self {
            bos: 0,
            pad: 1,
            eos: 2,
            unk: 3,
        }
    }
}

impl SpecialTokens {
    /// Snapshots the special ids of any vocabulary.
    pub fn of(vocab: &(impl Vocabulary + ?Sized)) -> Self {
        Self {
            bos: vocab.bos(),
            pad: vocab.pad(),
            eos: vocab.eos(),
            unk: vocab.unk(),
        }
    }

    /// Checks that `other` uses the same pad/eos/unk ids.
    ///
    /// Source and target sides of a pair dataset share one special-token
    /// space; the first differing id is reported as
    /// [`DataError::VocabularyMismatch`].
    pub fn ensure_compatible(&self, other: &SpecialTokens) -> Result<()> {
        let pairs = [
            ("pad", self.pad, other.pad),
            ("eos", self.eos, other.eos),
            ("unk", self.unk, other.unk),
        ];
        for (token, src_id, tgt_id) in pairs {
            if src_id != tgt_id {
                return Err(DataError::VocabularyMismatch {
                    token,
                    src_id,
                    tgt_id,
                }
                .into());
            }
        }
        Ok(())
    }
}

impl Vocabulary for SpecialTokens {
    fn pad(&self) -> i64 {
        self.pad
    }

    fn eos(&self) -> i64 {
        self.eos
    }

    fn unk(&self) -> i64 {
        self.unk
    }

    fn bos(&self) -> i64 {
        self.bos
    }
}
