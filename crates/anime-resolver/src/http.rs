//! Browser-like HTTP access for source adapters.
//!
//! Each adapter owns its own [`PageFetcher`]. There is no cookie store, so no
//! session state is carried between calls or shared between sources.

use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, ORIGIN, REFERER, USER_AGENT,
};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use shared::{ResolveError, Result};
use std::time::Duration;
use tracing::{debug, warn};

const ACCEPT_HTML: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";
const ACCEPT_JSON: &str = "application/json, text/javascript, */*; q=0.01";

fn default_headers(user_agent: &str, referer: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(ua) = HeaderValue::from_str(user_agent) {
        headers.insert(USER_AGENT, ua);
    }
    headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_HTML));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    if let Ok(hv) = HeaderValue::from_str(referer) {
        headers.insert(REFERER, hv);
    }
    headers.insert(
        HeaderName::from_static("sec-fetch-dest"),
        HeaderValue::from_static("document"),
    );
    headers.insert(
        HeaderName::from_static("sec-fetch-mode"),
        HeaderValue::from_static("navigate"),
    );
    headers.insert(
        HeaderName::from_static("sec-fetch-site"),
        HeaderValue::from_static("same-origin"),
    );
    headers
}

/// HTTP client bound to one source
#[derive(Clone)]
pub struct PageFetcher {
    client: Client,
    /// Used in error messages
    source_id: String,
}

impl PageFetcher {
    pub fn new(source_id: &str, base_url: &str, user_agent: &str, timeout: Duration) -> Result<Self> {
        let referer = format!("{}/", base_url.trim_end_matches('/'));
        let client = Client::builder()
            .default_headers(default_headers(user_agent, &referer))
            .redirect(reqwest::redirect::Policy::limited(10))
            .timeout(timeout)
            .build()
            .map_err(|e| ResolveError::http(format!("Failed to create HTTP client for {}", source_id), e))?;

        Ok(Self {
            client,
            source_id: source_id.to_string(),
        })
    }

    /// GET a page as text
    pub async fn get_text(&self, url: &str) -> Result<String> {
        debug!(source = %self.source_id, url = %url, "GET");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ResolveError::http(format!("{} request failed", self.source_id), e))?;
        self.read_body(url, response).await
    }

    /// GET an AJAX endpoint and decode the JSON body
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str, referer: &str) -> Result<T> {
        debug!(source = %self.source_id, url = %url, "GET (json)");
        let response = self
            .client
            .get(url)
            .header(ACCEPT, ACCEPT_JSON)
            .header(REFERER, referer)
            .header("X-Requested-With", "XMLHttpRequest")
            .send()
            .await
            .map_err(|e| ResolveError::http(format!("{} request failed", self.source_id), e))?;
        let body = self.read_body(url, response).await?;
        decode_json(&self.source_id, url, &body)
    }

    /// POST a form the way the site's own scripts do
    pub async fn post_form(
        &self,
        url: &str,
        form: &[(&str, &str)],
        referer: &str,
        origin: &str,
    ) -> Result<String> {
        debug!(source = %self.source_id, url = %url, "POST");
        let response = self
            .client
            .post(url)
            .header(REFERER, referer)
            .header(ORIGIN, origin)
            .header("X-Requested-With", "XMLHttpRequest")
            .form(form)
            .send()
            .await
            .map_err(|e| ResolveError::http(format!("{} request failed", self.source_id), e))?;
        self.read_body(url, response).await
    }

    async fn read_body(&self, url: &str, response: Response) -> Result<String> {
        check_status(&self.source_id, url, response.status())?;

        response
            .text()
            .await
            .map_err(|e| ResolveError::http(format!("Failed to read {} response", self.source_id), e))
    }
}

/// Map a response status onto the error taxonomy.
///
/// 404 is the page for a title the site does not carry; any other non-2xx
/// status is an upstream failure.
pub(crate) fn check_status(source_id: &str, url: &str, status: StatusCode) -> Result<()> {
    if status == StatusCode::NOT_FOUND {
        return Err(ResolveError::not_found(format!(
            "{} has no page at {}",
            source_id, url
        )));
    }
    if !status.is_success() {
        warn!(source = %source_id, url = %url, status = %status, "Request failed");
        return Err(ResolveError::upstream(format!(
            "{} returned HTTP {} for {}",
            source_id, status, url
        )));
    }
    Ok(())
}

/// Decode an AJAX body; a body of the wrong shape is an upstream failure
pub(crate) fn decode_json<T: DeserializeOwned>(source_id: &str, url: &str, body: &str) -> Result<T> {
    serde_json::from_str(body).map_err(|e| {
        warn!(source = %source_id, url = %url, error = %e, "Unexpected JSON shape");
        ResolveError::upstream(format!("{} returned malformed JSON: {}", source_id, e))
    })
}

/// Local HTTP server answering every request with canned responses
#[cfg(test)]
pub(crate) mod canned {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    /// One response per path prefix; unmatched paths get a 404
    #[derive(Clone)]
    pub struct Route {
        pub prefix: &'static str,
        pub status: u16,
        pub body: &'static str,
    }

    impl Route {
        pub fn new(prefix: &'static str, status: u16, body: &'static str) -> Self {
            Self {
                prefix,
                status,
                body,
            }
        }
    }

    /// Serve `routes` on an ephemeral port and return the base URL
    pub async fn serve(routes: Vec<Route>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let routes = routes.clone();
                tokio::spawn(async move {
                    let _ = answer(stream, &routes).await;
                });
            }
        });

        format!("http://{}", addr)
    }

    async fn answer(mut stream: TcpStream, routes: &[Route]) -> std::io::Result<()> {
        let mut request = Vec::new();
        let mut buf = [0u8; 4096];

        // Headers, then as much body as Content-Length announces
        let header_end = loop {
            let n = stream.read(&mut buf).await?;
            if n == 0 {
                return Ok(());
            }
            request.extend_from_slice(&buf[..n]);
            if let Some(pos) = request.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };
        let head = String::from_utf8_lossy(&request[..header_end]).to_string();
        let content_length = head
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        while request.len() < header_end + content_length {
            let n = stream.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
        }

        let path = head.split_whitespace().nth(1).unwrap_or("/");
        let (status, body) = routes
            .iter()
            .find(|r| path.starts_with(r.prefix))
            .map(|r| (r.status, r.body))
            .unwrap_or((404, "not found"));

        let response = format!(
            "HTTP/1.1 {} Canned\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        stream.write_all(response.as_bytes()).await?;
        stream.shutdown().await
    }
}
