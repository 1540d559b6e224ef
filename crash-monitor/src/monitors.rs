mod app_state;
mod deadlock;
mod system;
mod user;
mod zombie;

pub use app_state::AppStateMonitor;
pub use deadlock::DeadlockWatchdog;
pub use system::{AppIdentity, SystemMonitor};
pub use user::UserReportedMonitor;
pub use zombie::ZombieMonitor;
