//! Blob fetch calling conventions.
//!
//! Helper releases changed the `blob fetch` argument shape more than once.
//! Conventions are tried in [`BlobFetchConvention::ORDER`]; the first one
//! that succeeds wins.

use std::path::Path;

/// One `blob fetch` argument shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobFetchConvention {
    /// `blob fetch <ref> <digest>`, blob on stdout.
    Positional,

    /// `blob fetch <ref>@<digest>`, blob on stdout.
    CombinedRef,

    /// `blob fetch --output <file> <ref>@<digest>`, blob written to a file.
    OutputFile,
}

impl BlobFetchConvention {
    /// Conventions in the order they are tried.
    pub const ORDER: [BlobFetchConvention; 3] = [Self::Positional, Self::CombinedRef, Self::OutputFile];

    /// Helper arguments for this convention.
    pub fn args(&self, reference: &str, digest: &str, output: &Path) -> Vec<String> {
        let combined = || format!("{}@{}", repository_of(reference), digest);
        match self {
            Self::Positional => vec![
                "blob".to_string(),
                "fetch".to_string(),
                reference.to_string(),
                digest.to_string(),
            ],
            Self::CombinedRef => vec!["blob".to_string(), "fetch".to_string(), combined()],
            Self::OutputFile => vec![
                "blob".to_string(),
                "fetch".to_string(),
                "--output".to_string(),
                output.to_string_lossy().into_owned(),
                combined(),
            ],
        }
    }

    /// Whether the blob arrives in a file rather than on stdout.
    pub fn writes_file(&self) -> bool {
        matches!(self, Self::OutputFile)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Positional => "positional",
            Self::CombinedRef => "combined-ref",
            Self::OutputFile => "output-file",
        }
    }
}

/// `<repo>@<digest>` must not keep a tag or an older digest on the repository part.
fn repository_of(reference: &str) -> &str {
    crate::reference::repository_for_tags(reference)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIGEST: &str = "sha256:bbbb";

    #[test]
    fn test_order_is_positional_combined_file() {
        assert_eq!(
            BlobFetchConvention::ORDER,
            [
                BlobFetchConvention::Positional,
                BlobFetchConvention::CombinedRef,
                BlobFetchConvention::OutputFile
            ]
        );
        assert!(BlobFetchConvention::ORDER
            .iter()
            .filter(|c| c.writes_file())
            .eq([BlobFetchConvention::OutputFile].iter()));
    }

    #[test]
    fn test_args_per_convention() {
        let out = Path::new("/tmp/blob.bin");
        let reference = "reg.local/team/demo:1.0.0";

        assert_eq!(
            BlobFetchConvention::Positional.args(reference, DIGEST, out),
            vec!["blob", "fetch", "reg.local/team/demo:1.0.0", "sha256:bbbb"]
        );
        assert_eq!(
            BlobFetchConvention::CombinedRef.args(reference, DIGEST, out),
            vec!["blob", "fetch", "reg.local/team/demo@sha256:bbbb"]
        );
        assert_eq!(
            BlobFetchConvention::OutputFile.args(reference, DIGEST, out),
            vec!["blob", "fetch", "--output", "/tmp/blob.bin", "reg.local/team/demo@sha256:bbbb"]
        );
    }
}
