mod recovery_manager;

pub use recovery_manager::RecoveryManager;
