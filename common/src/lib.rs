pub mod nomad;
pub mod payload;
pub mod zeebe;

pub use nomad::{JobSummary, NomadClient, NomadJob, NomadTask, TaskGroup};
pub use payload::JobPayload;
pub use zeebe::{ActivatedJob, JobHeaders, ZeebeClient};
