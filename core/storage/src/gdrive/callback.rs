//! Loopback listener that captures the OAuth2 consent redirect.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};
use url::Url;

use drivebackup_common::{Error, Result};

const SUCCESS_PAGE: &str = "<html><body><p>The authentication flow has completed. \
You may close this window.</p></body></html>";

/// Query parameters delivered to the redirect URI.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthCallback {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

impl AuthCallback {
    /// Parse the request target of a redirect (e.g. `/?code=...&state=...`).
    pub fn parse(target: &str) -> Result<Self> {
        let url = Url::parse("http://localhost")
            .and_then(|base| base.join(target))
            .map_err(|e| Error::Authentication(format!("Malformed redirect '{}': {}", target, e)))?;

        let mut callback = AuthCallback::default();
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "code" => callback.code = Some(value.into_owned()),
                "state" => callback.state = Some(value.into_owned()),
                "error" => callback.error = Some(value.into_owned()),
                _ => {}
            }
        }

        Ok(callback)
    }

    /// Whether this request is the consent redirect rather than, say, a favicon.
    fn is_redirect(&self) -> bool {
        self.code.is_some() || self.error.is_some()
    }

    /// Extract the authorization code, checking the CSRF state.
    pub fn into_code(self, expected_state: &str) -> Result<String> {
        if let Some(error) = self.error {
            return Err(Error::Authentication(format!(
                "Authorization was denied: {}",
                error
            )));
        }

        if self.state.as_deref() != Some(expected_state) {
            return Err(Error::Authentication(
                "State mismatch in authorization redirect".to_string(),
            ));
        }

        self.code.ok_or_else(|| {
            Error::Authentication("There was no authorization code in the redirect".to_string())
        })
    }
}

/// One-shot HTTP listener on a free loopback port.
pub struct CallbackListener {
    listener: TcpListener,
    port: u16,
}

impl CallbackListener {
    /// Bind to an OS-assigned port on 127.0.0.1.
    pub async fn bind() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await.map_err(|e| {
            Error::Authentication(format!(
                "Unable to set up a listener for the authorization code: {}",
                e
            ))
        })?;
        let port = listener.local_addr()?.port();

        Ok(Self { listener, port })
    }

    /// The port the listener is bound to.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Redirect URI to register with the consent request.
    ///
    /// Names the bound IPv4 loopback address so the browser cannot pick `::1`.
    pub fn redirect_url(&self) -> String {
        format!("http://127.0.0.1:{}/", self.port)
    }

    /// Wait for the consent redirect and answer it.
    ///
    /// Requests that carry neither a code nor an error get a 404 and the
    /// listener keeps waiting.
    pub async fn accept(self) -> Result<AuthCallback> {
        loop {
            let (mut stream, peer) = self.listener.accept().await?;
            debug!("Redirect listener connection from {}", peer);

            let target = match read_request_target(&mut stream).await {
                Ok(target) => target,
                Err(e) => {
                    warn!("Malformed request on redirect listener: {}", e);
                    respond(&mut stream, "400 Bad Request", "Malformed request").await;
                    continue;
                }
            };

            let callback = match AuthCallback::parse(&target) {
                Ok(callback) if callback.is_redirect() => callback,
                _ => {
                    respond(&mut stream, "404 Not Found", "Not found").await;
                    continue;
                }
            };

            respond(&mut stream, "200 OK", SUCCESS_PAGE).await;
            return Ok(callback);
        }
    }
}

async fn read_request_target(stream: &mut TcpStream) -> Result<String> {
    let mut reader = BufReader::new(stream);
    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;

    // Drain the headers so closing the socket does not reset the connection.
    let mut header = String::new();
    loop {
        header.clear();
        let n = reader.read_line(&mut header).await?;
        if n == 0 || header == "\r\n" || header == "\n" {
            break;
        }
    }

    let mut parts = request_line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(_method), Some(target)) => Ok(target.to_string()),
        _ => Err(Error::Authentication(format!(
            "Unexpected request line '{}'",
            request_line.trim_end()
        ))),
    }
}

async fn respond(stream: &mut TcpStream, status: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );

    if let Err(e) = stream.write_all(response.as_bytes()).await {
        warn!("Failed to answer redirect request: {}", e);
    }
    let _ = stream.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    async fn send(port: u16, target: &str) -> String {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let request = format!("GET {} HTTP/1.1\r\nHost: localhost\r\n\r\n", target);
        stream.write_all(request.as_bytes()).await.unwrap();

        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[test]
    fn test_parse_callback() {
        let callback = AuthCallback::parse("/?state=xyz&code=4%2F0Abc&scope=drive").unwrap();
        assert_eq!(callback.code.as_deref(), Some("4/0Abc"));
        assert_eq!(callback.state.as_deref(), Some("xyz"));
        assert_eq!(callback.into_code("xyz").unwrap(), "4/0Abc");
    }

    #[test]
    fn test_state_mismatch() {
        let callback = AuthCallback::parse("/?state=forged&code=c").unwrap();
        assert!(matches!(
            callback.into_code("expected"),
            Err(Error::Authentication(_))
        ));
    }

    #[test]
    fn test_denied_consent() {
        let callback = AuthCallback::parse("/?error=access_denied&state=s").unwrap();
        let err = callback.into_code("s").unwrap_err();
        assert!(err.to_string().contains("access_denied"));
    }

    #[test]
    fn test_missing_code() {
        let callback = AuthCallback::parse("/?state=s").unwrap();
        assert!(callback.into_code("s").is_err());
    }

    #[tokio::test]
    async fn test_listener_captures_redirect() {
        let listener = CallbackListener::bind().await.unwrap();
        let port = listener.port();
        assert_eq!(listener.redirect_url(), format!("http://127.0.0.1:{}/", port));

        let client = tokio::spawn(async move {
            let favicon = send(port, "/favicon.ico").await;
            let redirect = send(port, "/?state=st&code=the-code").await;
            (favicon, redirect)
        });

        let callback = listener.accept().await.unwrap();
        let (favicon, redirect) = client.await.unwrap();

        assert!(favicon.starts_with("HTTP/1.1 404"));
        assert!(redirect.starts_with("HTTP/1.1 200"));
        assert!(redirect.contains("authentication flow has completed"));
        assert_eq!(callback.into_code("st").unwrap(), "the-code");
    }
}
