pub use zk_backup_core::{config, contract, retention, storage_keys};
