pub mod endpoint;
pub mod ids;
pub mod run;
pub mod scenario;

pub use endpoint::*;
pub use ids::{InstanceId, RunId};
pub use run::*;
pub use scenario::*;
