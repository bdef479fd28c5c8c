//! Platform IPC listener: the host binds first, then waits for the server
//! to connect in, reversing `pty-proxy`'s dial-out direction since here the
//! host, not the client, owns the well-known address.

use anyhow::Context;

#[cfg(unix)]
pub struct HostListener {
    inner: tokio::net::UnixListener,
    path: std::path::PathBuf,
}

#[cfg(unix)]
impl HostListener {
    pub fn bind(address: &str) -> anyhow::Result<Self> {
        let path = std::path::PathBuf::from(address);
        // A previous host process using the same pid-qualified address
        // would be surprising, but clean up a stale socket file left by a
        // prior crash regardless.
        if path.exists() {
            std::fs::remove_file(&path).ok();
        }
        let listener = tokio::net::UnixListener::bind(&path)
            .with_context(|| format!("binding host ipc socket at {}", path.display()))?;
        set_owner_only_permissions(&path)?;
        Ok(Self { inner: listener, path })
    }

    pub async fn accept(&self) -> anyhow::Result<tokio::net::UnixStream> {
        let (stream, _addr) = self.inner.accept().await?;
        Ok(stream)
    }
}

#[cfg(unix)]
fn set_owner_only_permissions(path: &std::path::Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let perms = std::fs::Permissions::from_mode(0o600);
    std::fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(unix)]
impl Drop for HostListener {
    fn drop(&mut self) {
        std::fs::remove_file(&self.path).ok();
    }
}

#[cfg(windows)]
pub struct HostListener {
    inner: tokio::net::windows::named_pipe::NamedPipeServer,
}

#[cfg(windows)]
impl HostListener {
    pub fn bind(address: &str) -> anyhow::Result<Self> {
        let inner = tokio::net::windows::named_pipe::ServerOptions::new()
            .first_pipe_instance(true)
            .create(address)
            .with_context(|| format!("creating named pipe at {address}"))?;
        Ok(Self { inner })
    }

    pub async fn accept(&self) -> anyhow::Result<&tokio::net::windows::named_pipe::NamedPipeServer> {
        self.inner.connect().await?;
        Ok(&self.inner)
    }
}
