pub use tracing::{debug, info, trace, warn};
