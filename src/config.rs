/// Interpreter settings. The binary fills these from command-line flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Maximum number of nested user-function calls before the run is
    /// stopped with a fatal stack-overflow condition.
    pub max_call_depth: usize,
    /// Seed for `random()`; entropy-seeded when unset.
    pub seed: Option<u64>,
}

pub const DEFAULT_MAX_CALL_DEPTH: usize = 1000;

impl Default for Config {
    fn default() -> Self {
        Self {
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            seed: None,
        }
    }
}

impl Config {
    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}
