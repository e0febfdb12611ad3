use std::time::Duration;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum ProvisionError {
    #[error("invalid client configuration: {0}")]
    Configuration(String),

    #[error("{scope} not opened yet; call `{open_fn}` first")]
    ScopeNotOpen {
        scope: &'static str,
        open_fn: &'static str,
    },

    #[error("creating {kind} `{name}` did not converge to a single match (found {found})")]
    Reconciliation {
        kind: &'static str,
        name: String,
        found: usize,
    },

    #[error("found {count} matches for {kind} `{name}`; refusing to guess")]
    AmbiguousMatch {
        kind: &'static str,
        name: String,
        count: usize,
    },

    #[error("cannot override `{key}`; not among {valid:?}")]
    UnknownOverrideKey { key: String, valid: Vec<String> },

    #[error("failed to import file from volume path `{volume_path}`")]
    ImportFailed { volume_path: String },

    #[error("{kind} `{id}` is not available (status: {status})")]
    UnavailableResource {
        kind: &'static str,
        id: String,
        status: String,
    },

    #[error("job did not reach a terminal state within {waited:?}")]
    PollTimeout { waited: Duration },

    #[error("invalid remote path: {0}")]
    InvalidPath(String),

    #[error("SevenBridges request failed: {0}")]
    SbgHttp(String),

    #[error("SevenBridges returned status {status}: {message}")]
    SbgStatus { status: u16, message: String },

    #[error("Nextflow Tower request failed: {0}")]
    TowerHttp(String),

    #[error("Nextflow Tower returned status {status}: {message}")]
    TowerStatus { status: u16, message: String },

    #[error("Synapse request failed: {0}")]
    SynapseHttp(String),

    #[error("Synapse returned status {status}: {message}")]
    SynapseStatus { status: u16, message: String },
}
