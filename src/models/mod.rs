pub mod package;
pub mod subscription;
