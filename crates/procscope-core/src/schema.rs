//! Schema ID constants for JSON output contracts.
//!
//! Every `procscope ... --json` output includes a `schema_id` field that
//! references the corresponding schema:
//!
//! ```text
//! https://schemas.procscope.dev/<topic>/<version>/<filename>
//! ```

/// Schema ID for `procscope tree --json` output (v1.0.0).
pub const PROCESS_TREE_V1: &str =
    "https://schemas.procscope.dev/process/v1.0.0/process-tree.schema.json";

/// Schema ID for `procscope find --json` output (v1.0.0).
pub const PROCESS_MATCH_V1: &str =
    "https://schemas.procscope.dev/process/v1.0.0/process-match.schema.json";

/// Schema ID for `procscope show --json` output (v1.0.0).
pub const PROCESS_DETAIL_V1: &str =
    "https://schemas.procscope.dev/process/v1.0.0/process-detail.schema.json";

/// Schema ID for `procscope children --json` output (v1.0.0).
pub const PROCESS_CHILDREN_V1: &str =
    "https://schemas.procscope.dev/process/v1.0.0/process-children.schema.json";
