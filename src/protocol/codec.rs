use super::headers::HeaderMultiMap;
use super::types::{Request, Response, Version};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use http::Method;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::trace;

/// Upper bound on the number of response headers accepted.
pub const MAX_HEADERS: usize = 100;
/// Upper bound on the size of a response head (status line plus headers).
pub const MAX_HEAD_BYTES: usize = 64 * 1024;

const READ_CHUNK: usize = 8 * 1024;

/// Failure while moving bytes over a connection.
///
/// `received` counts response bytes that had arrived before the failure,
/// which decides whether the attempt can be replayed.
#[derive(Debug)]
pub enum WireError {
    Io { received: usize, source: io::Error },
    TimedOut { received: usize },
    Malformed(String),
}

/// A parsed response plus whether its connection may carry another request.
#[derive(Debug)]
pub struct ReadResponse {
    pub response: Response,
    pub reusable: bool,
}

/// Serialize a request line, headers and body.
///
/// Headers go out in insertion order with their original spelling. A
/// `Content-Length` header is added for bodies that carry no framing header.
pub fn encode_request(request: &Request) -> Bytes {
    let body_len = request.body.as_ref().map_or(0, |body| body.len());
    let mut buf = BytesMut::with_capacity(256 + body_len);

    buf.put_slice(request.method.as_str().as_bytes());
    buf.put_u8(b' ');
    buf.put_slice(request.target.as_bytes());
    buf.put_slice(b" HTTP/1.1\r\n");

    for (name, value) in request.headers.iter() {
        put_header(&mut buf, name, value);
    }

    if let Some(body) = &request.body {
        let framed = request.headers.contains("content-length")
            || request.headers.contains("transfer-encoding");
        if !framed {
            put_header(&mut buf, "Content-Length", &body.len().to_string());
        }
    }

    buf.put_slice(b"\r\n");
    if let Some(body) = &request.body {
        buf.put_slice(body);
    }
    buf.freeze()
}

fn put_header(buf: &mut BytesMut, name: &str, value: &str) {
    buf.put_slice(name.as_bytes());
    buf.put_slice(b": ");
    buf.put_slice(value.as_bytes());
    buf.put_slice(b"\r\n");
}

/// Write a serialized request and flush it within `write_timeout`.
pub async fn write_request<S>(
    stream: &mut S,
    request: &Request,
    write_timeout: Duration,
) -> Result<(), WireError>
where
    S: AsyncWrite + Unpin + Send,
{
    let bytes = encode_request(request);
    let write = async {
        stream.write_all(&bytes).await?;
        stream.flush().await
    };

    match timeout(write_timeout, write).await {
        Ok(Ok(())) => {
            trace!("Wrote {} request bytes", bytes.len());
            Ok(())
        }
        Ok(Err(source)) => Err(WireError::Io {
            received: 0,
            source,
        }),
        Err(_) => Err(WireError::TimedOut { received: 0 }),
    }
}

/// Read one complete response for a request made with `method`.
///
/// Every individual socket read gets its own `read_timeout` deadline.
pub async fn read_response<S>(
    stream: &mut S,
    method: &Method,
    read_timeout: Duration,
) -> Result<ReadResponse, WireError>
where
    S: AsyncRead + Unpin + Send,
{
    let mut reader = ResponseReader {
        stream,
        buf: BytesMut::with_capacity(READ_CHUNK),
        received: 0,
        read_timeout,
    };

    let head = loop {
        let head = reader.read_head().await?;
        // Interim 1xx responses precede the real one.
        if (100..200).contains(&head.status) && head.status != 101 {
            trace!("Skipping interim {} response", head.status);
            continue;
        }
        break head;
    };

    let framing = body_framing(method, &head)?;
    let (data, close_delimited) = match framing {
        BodyFraming::Empty => (Bytes::new(), false),
        BodyFraming::Length(len) => (reader.read_exact(len).await?, false),
        BodyFraming::Chunked => (reader.read_chunked().await?, false),
        BodyFraming::UntilClose => (reader.read_to_end().await?, true),
    };

    let keep_alive = match head.version {
        Version::Http11 => !head.headers.has_token("connection", "close"),
        Version::Http10 => head.headers.has_token("connection", "keep-alive"),
    };
    let reusable = keep_alive && !close_delimited && reader.buf.is_empty();

    Ok(ReadResponse {
        response: Response {
            version: head.version,
            status: head.status,
            reason: head.reason,
            headers: head.headers,
            data,
        },
        reusable,
    })
}

struct ResponseHead {
    version: Version,
    status: u16,
    reason: String,
    headers: HeaderMultiMap,
}

#[derive(Debug, PartialEq, Eq)]
enum BodyFraming {
    Empty,
    Length(usize),
    Chunked,
    UntilClose,
}

fn body_framing(method: &Method, head: &ResponseHead) -> Result<BodyFraming, WireError> {
    if *method == Method::HEAD || head.status == 204 || head.status == 304 {
        return Ok(BodyFraming::Empty);
    }

    if head.headers.has_token("transfer-encoding", "chunked") {
        return Ok(BodyFraming::Chunked);
    }

    let lengths = head.headers.get_all("content-length");
    if let Some(first) = lengths.first() {
        let len: usize = first
            .trim()
            .parse()
            .map_err(|_| WireError::Malformed(format!("invalid Content-Length: {}", first)))?;
        if lengths.iter().any(|other| other.trim() != first.trim()) {
            return Err(WireError::Malformed(
                "conflicting Content-Length headers".to_string(),
            ));
        }
        return Ok(if len == 0 {
            BodyFraming::Empty
        } else {
            BodyFraming::Length(len)
        });
    }

    Ok(BodyFraming::UntilClose)
}

struct ResponseReader<'a, S> {
    stream: &'a mut S,
    buf: BytesMut,
    received: usize,
    read_timeout: Duration,
}

impl<S> ResponseReader<'_, S>
where
    S: AsyncRead + Unpin + Send,
{
    /// Read more bytes into the buffer. Returns 0 at end of stream.
    async fn fill(&mut self) -> Result<usize, WireError> {
        self.buf.reserve(READ_CHUNK);
        match timeout(self.read_timeout, self.stream.read_buf(&mut self.buf)).await {
            Ok(Ok(n)) => {
                self.received += n;
                Ok(n)
            }
            Ok(Err(source)) => Err(WireError::Io {
                received: self.received,
                source,
            }),
            Err(_) => Err(WireError::TimedOut {
                received: self.received,
            }),
        }
    }

    /// Like `fill`, but end of stream is an error.
    async fn fill_required(&mut self) -> Result<(), WireError> {
        if self.fill().await? == 0 {
            return Err(WireError::Io {
                received: self.received,
                source: io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed before response completed",
                ),
            });
        }
        Ok(())
    }

    async fn read_head(&mut self) -> Result<ResponseHead, WireError> {
        loop {
            if let Some(head) = self.try_parse_head()? {
                return Ok(head);
            }
            if self.buf.len() >= MAX_HEAD_BYTES {
                return Err(WireError::Malformed(format!(
                    "response head exceeds {} bytes",
                    MAX_HEAD_BYTES
                )));
            }
            self.fill_required().await?;
        }
    }

    fn try_parse_head(&mut self) -> Result<Option<ResponseHead>, WireError> {
        if self.buf.is_empty() {
            return Ok(None);
        }

        let mut raw_headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut parsed = httparse::Response::new(&mut raw_headers);
        let consumed = match parsed.parse(&self.buf) {
            Ok(httparse::Status::Complete(n)) => n,
            Ok(httparse::Status::Partial) => return Ok(None),
            Err(e) => return Err(WireError::Malformed(format!("invalid response head: {}", e))),
        };

        let version = match parsed.version {
            Some(0) => Version::Http10,
            _ => Version::Http11,
        };
        let status = parsed.code.unwrap_or_default();
        let reason = parsed.reason.unwrap_or_default().to_string();
        let headers: HeaderMultiMap = parsed
            .headers
            .iter()
            .map(|header| {
                (
                    header.name.to_string(),
                    String::from_utf8_lossy(header.value).into_owned(),
                )
            })
            .collect();

        self.buf.advance(consumed);
        trace!("Parsed response head: {} {} ({} headers)", status, reason, headers.len());

        Ok(Some(ResponseHead {
            version,
            status,
            reason,
            headers,
        }))
    }

    async fn read_exact(&mut self, len: usize) -> Result<Bytes, WireError> {
        while self.buf.len() < len {
            self.fill_required().await?;
        }
        Ok(self.buf.split_to(len).freeze())
    }

    async fn read_line(&mut self) -> Result<Bytes, WireError> {
        loop {
            if let Some(pos) = self.buf.windows(2).position(|window| window == b"\r\n") {
                let line = self.buf.split_to(pos).freeze();
                self.buf.advance(2);
                return Ok(line);
            }
            if self.buf.len() >= MAX_HEAD_BYTES {
                return Err(WireError::Malformed("chunk line too long".to_string()));
            }
            self.fill_required().await?;
        }
    }

    async fn read_chunked(&mut self) -> Result<Bytes, WireError> {
        let mut body = BytesMut::new();
        loop {
            let line = self.read_line().await?;
            let size = parse_chunk_size(&line)?;
            if size == 0 {
                // Trailers end with an empty line.
                while !self.read_line().await?.is_empty() {}
                return Ok(body.freeze());
            }
            let chunk = self.read_exact(size).await?;
            body.put_slice(&chunk);
            if !self.read_line().await?.is_empty() {
                return Err(WireError::Malformed("missing CRLF after chunk".to_string()));
            }
        }
    }

    async fn read_to_end(&mut self) -> Result<Bytes, WireError> {
        while self.fill().await? > 0 {}
        Ok(self.buf.split().freeze())
    }
}

fn parse_chunk_size(line: &[u8]) -> Result<usize, WireError> {
    let text = std::str::from_utf8(line)
        .map_err(|_| WireError::Malformed("chunk size is not ASCII".to_string()))?;
    let digits = text.split(';').next().unwrap_or_default().trim();
    usize::from_str_radix(digits, 16)
        .map_err(|_| WireError::Malformed(format!("invalid chunk size: {:?}", digits)))
}
