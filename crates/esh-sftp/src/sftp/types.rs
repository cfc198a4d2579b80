// ── Transfer façade types ─────────────────────────────────────────────────────

use esh_core::FileAttributes;
use serde::{Deserialize, Serialize};

/// One directory listing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEntry {
    pub filename: String,
    /// `ls -l` style line.
    #[serde(default)]
    pub longname: String,
    pub attrs: FileAttributes,
}
