// File transport: SFTP against agency servers and blob object storage

pub mod blob;
pub mod sftp;

pub use blob::{BlobClient, BlobStorage};
pub use sftp::{SftpClient, Ssh2SftpClient};
