pub mod permissions;

pub use permissions::PermissionTable;
