//! Errors of the finish and link phases.

use crate::ic::{IcId, StackMapId};

/// Errors produced while finishing or linking optimized code.
#[derive(Debug, thiserror::Error)]
pub enum JitError {
    /// A branch other than a recorded slow-path exit has no target.
    #[error("unlinked jump at position {position}")]
    UnlinkedJump { position: usize },

    /// The stack map a site was created with is unknown to the linker.
    #[error("no stack map recorded for {stack_map}")]
    MissingStackMap { stack_map: StackMapId },

    /// A site's slow-path exits do not pair up with its generators.
    #[error("inline cache {} has {generators} generators but {exits} slow-path exits", .ic.index())]
    UnbalancedSlowPathExits {
        ic: IcId,
        generators: usize,
        exits: usize,
    },

    /// Specialized code does not fit its patch region.
    #[error("specialized access needs {needed} instructions, region holds {available}")]
    RegionOverflow { needed: usize, available: usize },

    /// The background compile thread could not be started.
    #[error("failed to spawn compile worker: {0}")]
    WorkerSpawn(#[from] std::io::Error),

    /// The background compile thread is gone.
    #[error("compile worker disconnected")]
    WorkerGone,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_site() {
        let err = JitError::UnbalancedSlowPathExits {
            ic: IcId::new(3),
            generators: 2,
            exits: 1,
        };
        assert_eq!(
            err.to_string(),
            "inline cache 3 has 2 generators but 1 slow-path exits"
        );
        let err = JitError::MissingStackMap {
            stack_map: StackMapId::new(9),
        };
        assert_eq!(err.to_string(), "no stack map recorded for stackmap#9");
    }
}
