//! Construction options, resolved once per collection at creation time
//! and then fixed for its lifetime.

use std::path::PathBuf;
use std::time::Duration;

use crate::codec::CodecKind;
use crate::serializer::Format;

/// Options fixed at collection creation. `path` is the collection's own
/// directory under the engine root (`<base>/<collection>/`).
#[derive(Debug, Clone)]
pub struct CollectionConfig {
    pub path: PathBuf,
    pub codec: CodecKind,
    pub format: Format,
    /// Passthrough flag for OS file-protection APIs. The engine does not
    /// interpret this value; it is carried through so a caller embedding
    /// platform-specific behavior has somewhere to put it.
    pub file_protection: bool,
    pub compaction_threshold: usize,
    pub compaction_interval: Duration,
    pub operation_timeout: Option<Duration>,
}

impl CollectionConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            codec: CodecKind::None,
            format: Format::TagTree,
            file_protection: false,
            compaction_threshold: 100,
            compaction_interval: Duration::from_secs(60),
            operation_timeout: None,
        }
    }
}
