// SFTP transport against named agency servers

use crate::config::{SftpServerConfig, SftpSettings};
use crate::errors::TransportError;
use async_trait::async_trait;
use ssh2::Session;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::Path;
use tracing::{debug, error, info, instrument};

/// Access to remote agency file drops. Servers are addressed by the
/// name they carry in configuration.
#[async_trait]
pub trait SftpClient: Send + Sync {
    /// List file names (not paths) in a remote directory
    async fn list_files(&self, server: &str, remote_dir: &str)
        -> Result<Vec<String>, TransportError>;

    /// Download a remote file into memory
    async fn download(&self, server: &str, remote_path: &str) -> Result<Vec<u8>, TransportError>;

    /// Upload a file to the remote server
    async fn upload(
        &self,
        server: &str,
        remote_path: &str,
        content: &[u8],
    ) -> Result<(), TransportError>;

    /// Delete a remote file
    async fn delete(&self, server: &str, remote_path: &str) -> Result<(), TransportError>;
}

/// ssh2-backed implementation. Each call opens a fresh session; the
/// agency servers close idle connections aggressively.
pub struct Ssh2SftpClient {
    settings: SftpSettings,
}

impl Ssh2SftpClient {
    pub fn new(settings: SftpSettings) -> Self {
        Self { settings }
    }

    fn server(&self, name: &str) -> Result<&SftpServerConfig, TransportError> {
        self.settings
            .servers
            .get(name)
            .ok_or_else(|| TransportError::UnknownServer(name.to_string()))
    }

    fn connect(&self, name: &str) -> Result<Session, TransportError> {
        let server = self.server(name)?;
        info!(server = name, host = %server.host, port = server.port, "Establishing SFTP connection");

        let tcp = TcpStream::connect(format!("{}:{}", server.host, server.port)).map_err(|e| {
            error!(error = %e, host = %server.host, port = server.port, "Failed to connect");
            TransportError::SftpConnectionFailed(format!(
                "Failed to connect to {}:{}: {}",
                server.host, server.port, e
            ))
        })?;

        let timeout = Some(std::time::Duration::from_secs(self.settings.timeout_seconds));
        tcp.set_read_timeout(timeout).map_err(|e| {
            TransportError::SftpConnectionFailed(format!("Failed to set read timeout: {}", e))
        })?;
        tcp.set_write_timeout(timeout).map_err(|e| {
            TransportError::SftpConnectionFailed(format!("Failed to set write timeout: {}", e))
        })?;

        let mut sess = Session::new().map_err(|e| {
            error!(error = %e, "Failed to create SSH session");
            TransportError::SftpConnectionFailed(format!("Failed to create SSH session: {}", e))
        })?;
        sess.set_tcp_stream(tcp);

        sess.handshake().map_err(|e| {
            error!(error = %e, "SSH handshake failed");
            TransportError::SftpAuthenticationFailed(format!("SSH handshake failed: {}", e))
        })?;

        authenticate(&sess, server)?;

        if !sess.authenticated() {
            error!(server = name, "Authentication failed - session not authenticated");
            return Err(TransportError::SftpAuthenticationFailed(
                "Authentication failed".to_string(),
            ));
        }

        debug!(server = name, "SFTP connection established");
        Ok(sess)
    }
}

fn authenticate(sess: &Session, server: &SftpServerConfig) -> Result<(), TransportError> {
    if let Some(password) = &server.password {
        debug!(username = %server.username, "Authenticating with password");
        sess.userauth_password(&server.username, password)
            .map_err(|e| {
                error!(error = %e, username = %server.username, "Password authentication failed");
                TransportError::SftpAuthenticationFailed(format!(
                    "Password authentication failed for user {}: {}",
                    server.username, e
                ))
            })?;
    } else if let Some(key_path) = &server.private_key_path {
        debug!(username = %server.username, key_path = %key_path, "Authenticating with SSH key");
        sess.userauth_pubkey_file(&server.username, None, Path::new(key_path), None)
            .map_err(|e| {
                error!(error = %e, username = %server.username, "SSH key authentication failed");
                TransportError::SftpAuthenticationFailed(format!(
                    "SSH key authentication failed for user {}: {}",
                    server.username, e
                ))
            })?;
    } else {
        return Err(TransportError::SftpAuthenticationFailed(
            "No credentials configured".to_string(),
        ));
    }
    Ok(())
}

#[async_trait]
impl SftpClient for Ssh2SftpClient {
    #[instrument(skip(self))]
    async fn list_files(
        &self,
        server: &str,
        remote_dir: &str,
    ) -> Result<Vec<String>, TransportError> {
        let sess = self.connect(server)?;
        let sftp = sess.sftp().map_err(|e| {
            TransportError::SftpOperationFailed(format!("Failed to open SFTP channel: {}", e))
        })?;

        let entries = sftp.readdir(Path::new(remote_dir)).map_err(|e| {
            error!(error = %e, remote_dir = remote_dir, "Failed to list directory");
            TransportError::SftpOperationFailed(format!(
                "Failed to list directory '{}': {}",
                remote_dir, e
            ))
        })?;

        let mut names = Vec::new();
        for (path, stat) in entries {
            if stat.is_file() {
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    names.push(name.to_string());
                }
            }
        }

        debug!(remote_dir = remote_dir, count = names.len(), "Directory listed");
        Ok(names)
    }

    #[instrument(skip(self))]
    async fn download(&self, server: &str, remote_path: &str) -> Result<Vec<u8>, TransportError> {
        let sess = self.connect(server)?;
        let sftp = sess.sftp().map_err(|e| {
            TransportError::SftpOperationFailed(format!("Failed to open SFTP channel: {}", e))
        })?;

        let mut remote_file = sftp.open(Path::new(remote_path)).map_err(|e| {
            error!(error = %e, remote_path = remote_path, "Failed to open remote file");
            TransportError::SftpFileNotFound(format!("File not found: {}: {}", remote_path, e))
        })?;

        let mut buffer = Vec::new();
        remote_file.read_to_end(&mut buffer).map_err(|e| {
            error!(error = %e, remote_path = remote_path, "Failed to read file");
            TransportError::SftpOperationFailed(format!("Failed to read file: {}", e))
        })?;

        info!(remote_path = remote_path, size = buffer.len(), "File downloaded");
        Ok(buffer)
    }

    #[instrument(skip(self, content), fields(size = content.len()))]
    async fn upload(
        &self,
        server: &str,
        remote_path: &str,
        content: &[u8],
    ) -> Result<(), TransportError> {
        let sess = self.connect(server)?;
        let sftp = sess.sftp().map_err(|e| {
            TransportError::SftpOperationFailed(format!("Failed to open SFTP channel: {}", e))
        })?;

        let mut remote_file = sftp.create(Path::new(remote_path)).map_err(|e| {
            error!(error = %e, remote_path = remote_path, "Failed to create remote file");
            TransportError::SftpOperationFailed(format!("Failed to create remote file: {}", e))
        })?;

        remote_file.write_all(content).map_err(|e| {
            error!(error = %e, remote_path = remote_path, "Failed to write file");
            TransportError::SftpOperationFailed(format!("Failed to write file: {}", e))
        })?;

        info!(remote_path = remote_path, size = content.len(), "File uploaded");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, server: &str, remote_path: &str) -> Result<(), TransportError> {
        let sess = self.connect(server)?;
        let sftp = sess.sftp().map_err(|e| {
            TransportError::SftpOperationFailed(format!("Failed to open SFTP channel: {}", e))
        })?;

        sftp.unlink(Path::new(remote_path)).map_err(|e| {
            error!(error = %e, remote_path = remote_path, "Failed to delete remote file");
            TransportError::SftpOperationFailed(format!(
                "Failed to delete file '{}': {}",
                remote_path, e
            ))
        })?;

        info!(remote_path = remote_path, "Remote file deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings_with(name: &str, server: SftpServerConfig) -> SftpSettings {
        let mut servers = HashMap::new();
        servers.insert(name.to_string(), server);
        SftpSettings {
            servers,
            timeout_seconds: 5,
        }
    }

    #[tokio::test]
    async fn test_unknown_server_rejected() {
        let client = Ssh2SftpClient::new(settings_with(
            "agency",
            SftpServerConfig {
                host: "localhost".to_string(),
                port: 22,
                username: "ocms".to_string(),
                password: Some("secret".to_string()),
                private_key_path: None,
            },
        ));

        let result = client.list_files("other", "/outbound").await;
        assert!(matches!(result, Err(TransportError::UnknownServer(_))));
    }
}
