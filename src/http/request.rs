use crate::{
    errors::*,
    http::types::{self, Header, HeaderMap},
    limits::ReqLimits,
    query::Query,
    server::{connection::HttpConnection, transport::Transport},
    ConnectionData, Handler, Method, Url, Version,
};
use memchr::{memchr, memchr_iter};
use std::{io, mem, net::SocketAddr, time::Duration};
use tokio::{io::AsyncReadExt, time::sleep};

/// High-performance HTTP request representation.
///
/// Uses strategic memory alignment for optimal cache performance.
/// All data is zero-copy referenced from the original input.
#[derive(Debug, Clone, PartialEq)]
#[repr(align(128))]
pub struct Request {
    method: Method,
    url: Url,
    version: Version,
    headers: HeaderMap,
    body: Option<&'static [u8]>,
    client_addr: SocketAddr,
    server_addr: SocketAddr,
}

const UNSET_ADDR: SocketAddr = SocketAddr::new(std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED), 0);

impl Request {
    #[inline(always)]
    pub(crate) fn new(limits: &ReqLimits) -> Self {
        Request {
            method: Method::Get,
            url: Url::new(limits),
            version: Version::Http11,
            headers: HeaderMap::new(limits.header_count),
            body: None,
            client_addr: UNSET_ADDR,
            server_addr: UNSET_ADDR,
        }
    }

    #[inline(always)]
    pub(crate) fn reset(&mut self) {
        self.method = Method::Get;
        self.url.clear();
        self.version = Version::Http11;
        self.headers.reset();
        self.body = None;
        // client_addr/server_addr deliberately survive reset: they are set
        // once per TCP connection, not per request, and every request on a
        // keep-alive connection shares the same peer.
    }

    #[inline(always)]
    pub(crate) fn set_addrs(&mut self, client_addr: SocketAddr, server_addr: SocketAddr) {
        self.client_addr = client_addr;
        self.server_addr = server_addr;
    }
}

// Public API
impl Request {
    #[inline(always)]
    pub const fn method(&self) -> Method {
        self.method
    }

    #[inline(always)]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    #[inline(always)]
    pub const fn version(&self) -> Version {
        self.version
    }

    /// Returns the first header value with case-insensitive name matching
    /// (per [RFC 7230](https://tools.ietf.org/html/rfc7230#section-3.2)).
    /// Uses linear search.
    ///
    /// # Arguments
    /// - `name`: Header name bytes (e.g., `b"content-type"`)
    #[inline(always)]
    pub fn header(&self, name: &[u8]) -> Option<&[u8]> {
        self.headers.get(name)
    }

    /// Returns the value of the `Content-Length` header if present.
    #[inline(always)]
    pub const fn content_length(&self) -> Option<usize> {
        self.headers.content_length
    }

    /// Returns the request body if present.
    #[inline(always)]
    pub const fn body(&self) -> Option<&[u8]> {
        self.body
    }

    /// Returns `true` if the request carried `Transfer-Encoding: chunked`.
    ///
    /// The body returned by [`body()`](Self::body) is already dechunked;
    /// this only tells you which framing the client used.
    #[inline(always)]
    pub const fn is_chunked(&self) -> bool {
        self.headers.transfer_encoding_chunked
    }

    /// Returns `true` if the client sent `Expect: 100-continue`.
    ///
    /// When set, the handler should send an informational
    /// [`StatusCode::Continue`](crate::StatusCode::Continue) response before
    /// expecting the body to be fully available, per
    /// [RFC 9110, Section 10.1.1](https://www.rfc-editor.org/rfc/rfc9110#section-10.1.1).
    #[inline(always)]
    pub const fn expects_continue(&self) -> bool {
        self.headers.expect_continue
    }

    /// Returns the requested protocol name from an `Upgrade` header, if any.
    #[inline(always)]
    pub const fn upgrade_requested(&self) -> Option<&[u8]> {
        self.headers.upgrade
    }

    /// Returns the address of the client that sent this request.
    #[inline(always)]
    pub const fn client_addr(&self) -> SocketAddr {
        self.client_addr
    }

    /// Returns the local address the connection was accepted on.
    #[inline(always)]
    pub const fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }
}

// If you don't like using HttpConnection instead of transmitting all the
// values, then you can't even imagine what happened here...
// It's a pity now that you can understand this code (when passing all the
//  values, I didn't understand it myself):(
impl<H: Handler<S>, S: ConnectionData> HttpConnection<H, S> {
    #[inline]
    pub(crate) fn parse(&mut self) -> Result<Version, ErrorKind> {
        let version = self.parse_head()?;
        if version == Version::Http09 {
            return Ok(version);
        }
        self.parse_body()?;
        Ok(version)
    }

    /// Parses the request line and headers only, leaving the body untouched.
    ///
    /// Used on its own when the client sent `Expect: 100-continue`: the
    /// caller checks [`Request::expects_continue`] and
    /// [`body_available`](Self::body_available) before deciding whether to
    /// read more off the wire and call [`parse_body`](Self::parse_body).
    #[inline]
    pub(crate) fn parse_head(&mut self) -> Result<Version, ErrorKind> {
        self.parse_method()?;
        self.parse_url()?;
        if self.check_http09()? {
            return Ok(self.request.version);
        }
        self.check_version()?;

        self.parse_headers()?;
        self.check_host()?;

        Ok(self.request.version)
    }

    /// Validates and attaches the body, assuming [`parse_head`](Self::parse_head)
    /// has already run. Call this only once the full declared body (by
    /// `Content-Length` or chunked framing) is present in the buffer.
    #[inline]
    pub(crate) fn parse_body(&mut self) -> Result<(), ErrorKind> {
        self.check_body()
    }

    /// How many body bytes are currently sitting in the buffer past the end
    /// of the headers, versus how many the request declares.
    ///
    /// Returns `None` for chunked requests, whose true length isn't known
    /// until the terminating chunk is parsed.
    #[inline]
    pub(crate) fn body_available(&self) -> Option<(usize, usize)> {
        if self.request.headers.transfer_encoding_chunked {
            return None;
        }
        let declared = self.request.headers.content_length?;
        let available = self.parser.len - self.parser.position;
        Some((available, declared))
    }
}

// Parse first line
impl<H: Handler<S>, S: ConnectionData> HttpConnection<H, S> {
    // Basic methods
    #[inline]
    fn parse_method(&mut self) -> Result<(), ErrorKind> {
        // "OPTIONS " - The longest possible method with a space (8 bytes)
        let slice = self
            .parser
            .get_slice(0, 8)
            .ok_or(ErrorKind::InvalidMethod)?;

        (self.request.method, self.parser.position) = Method::from_bytes(slice)?;
        Ok(())
    }

    #[inline]
    // Cannot replace with `get_slice` or `find_slice` method
    // due to ownership error. And there is no need to use `into_static`
    fn parse_url(&mut self) -> Result<(), ErrorKind> {
        let [start, posit] = match self
            .parser
            .find_char(self.req_limits.precalc.url_size_memchr, b' ')
        {
            Some(pos) => [self.parser.position + 1, pos],
            None if self.is_http_09() => self.get_range_url_http_09()?,
            None => return Err(ErrorKind::UriTooLong),
        };

        let parser = &mut self.parser;
        let url = &mut self.request.url;

        let mut last = 0;
        let start_pos = start + posit;
        let slice_url = &parser.buffer[start..start_pos];

        if slice_url.is_empty() || parser.buffer[start - 1] != b'/' {
            return Err(ErrorKind::InvalidUrl);
        }

        for index in memchr_iter(b'/', slice_url) {
            if url.parts.len() == self.req_limits.url_parts {
                return Err(ErrorKind::InvalidUrl);
            }

            let slice_part = parser
                .get_slice_static(start + last, index - last)
                .ok_or(ErrorKind::InvalidUrl)?;

            if !slice_part.is_empty() {
                url.parts.push(slice_part);
            }
            last = index + 1;
        }

        let range = [start + last, (posit - last).saturating_sub(1)];
        let (end, url_middle) = match parser.find_char(posit, b'?') {
            Some(q_pos) => {
                let query_len = (range[0] + range[1]).saturating_sub(q_pos);

                if self.req_limits.query_plus_as_space {
                    if let Some(mutable) = parser.get_slice_mut(q_pos, query_len) {
                        for byte in mutable.iter_mut() {
                            if *byte == b'+' {
                                *byte = b' ';
                            }
                        }
                    }
                }

                let slice = parser
                    .get_slice_static(q_pos, query_len)
                    .ok_or(ErrorKind::InvalidUrl)?;
                let limit = url.query_parts.capacity();

                Query::parse_into(&mut url.query_parts, slice, limit)?;
                url.query = Some(slice);

                (q_pos, q_pos)
            }
            None => (posit, posit),
        };

        let slice = parser
            .get_slice_static(range[0], (parser.position + end).saturating_sub(range[0]))
            .ok_or(ErrorKind::InvalidUrl)?;

        if !slice.is_empty() {
            url.parts.push(slice);
        }

        url.path = parser
            .get_slice_static(parser.position, url_middle)
            .ok_or(ErrorKind::InvalidUrl)?;
        url.target = parser
            .get_slice_static(parser.position, posit)
            .ok_or(ErrorKind::InvalidUrl)?;

        parser.update_position(posit);

        Ok(())
    }

    #[inline]
    fn check_version(&mut self) -> Result<(), ErrorKind> {
        // "HTTP/1.X\r\n" - HTTP version with line break (10 bytes)
        let slice = self
            .parser
            .find_slice(10, b'\n')
            .ok_or(ErrorKind::InvalidVersion)?;

        if !matches!(slice.len(), 8 | 9) {
            return Err(ErrorKind::InvalidVersion);
        }

        let has_crlf = slice.last() == Some(&b'\r');
        if !has_crlf && self.req_limits.protocol_strict_level > 0 {
            return Err(ErrorKind::InvalidVersion);
        }

        (self.response.version, self.response.keep_alive) = Version::from_bytes(&slice[..8])?;
        self.request.version = self.response.version;

        // Check for the use of the '\r' character
        self.parser.has_crlf = has_crlf;

        Ok(())
    }

    // Auxiliary methods
    #[inline(always)]
    fn is_http_09(&self) -> bool {
        self.http_09_limits.is_some()
            && self.parser.len < self.req_limits.precalc.len_http09
            && self.request.method == Method::Get
            && self.parser.buffer[..self.parser.len].ends_with(b"\r\n")
    }

    #[inline]
    fn get_range_url_http_09(&mut self) -> Result<[usize; 2], ErrorKind> {
        let parser = &mut self.parser;

        let end_url = parser.len - 2;
        if parser.position >= end_url {
            return Err(ErrorKind::InvalidUrl);
        }
        let slice = parser
            .get_slice(parser.position, 12)
            .ok_or(ErrorKind::InvalidUrl)?;

        if slice.starts_with(b"/keep_alive") {
            self.response.keep_alive = true;
            parser.position += 11;
        } else {
            self.response.keep_alive = false;
        };

        self.request.version = Version::Http09;
        self.response.version = Version::Http09;

        Ok([parser.position + 1, end_url - parser.position])
    }

    #[inline]
    fn check_http09(&mut self) -> Result<bool, ErrorKind> {
        if self.request.version == Version::Http09 {
            if self.http_09_limits.is_none() {
                return Err(ErrorKind::UnsupportedVersion);
            }

            let p = &self.parser;
            match &p.buffer[p.position..p.len].ends_with(b"\n") {
                true => Ok(true),
                false => Err(ErrorKind::InvalidVersion),
            }
        } else {
            Ok(false)
        }
    }
}

// Parse headers
impl<H: Handler<S>, S: ConnectionData> HttpConnection<H, S> {
    // Basic methods
    #[inline]
    fn parse_headers(&mut self) -> Result<(), ErrorKind> {
        for _ in 0..=self.req_limits.header_count {
            let Some(header) = self.parse_header()? else {
                return Ok(());
            };

            if !self.parse_special_header(&header)? {
                self.record_protocol_header(&header);
                self.request.headers.headers.push(header);
            }
        }

        Err(ErrorKind::TooManyHeaders)
    }

    /// Sets typed convenience flags for headers that stay visible in
    /// [`Request::header`] instead of being consumed like `content-length`
    /// and `connection` are.
    #[inline]
    fn record_protocol_header(&mut self, header: &Header) {
        match header.name {
            b"host" => self.request.headers.has_host = true,
            b"transfer-encoding" => {
                if header.value.eq_ignore_ascii_case(b"chunked") {
                    self.request.headers.transfer_encoding_chunked = true;
                }
            }
            b"expect" => {
                if header.value.eq_ignore_ascii_case(b"100-continue") {
                    self.request.headers.expect_continue = true;
                }
            }
            b"upgrade" => self.request.headers.upgrade = Some(header.value),
            _ => {}
        }
    }

    #[inline]
    fn parse_header(&mut self) -> Result<Option<Header>, ErrorKind> {
        // HeaderName: Someone=data\r\n
        //                            |
        let mut end = self
            .parser
            .find_char(self.req_limits.precalc.h_line, b'\n')
            .ok_or(ErrorKind::InvalidHeader)?;

        // obs-fold (RFC 7230 3.2.4): a line starting with space/tab continues
        // the previous line's value. Only honored at relaxed strictness; a
        // real client on the open internet sending this is rare enough that
        // treating it as a parse error by default is the safer posture.
        let mut folded = false;
        if self.req_limits.protocol_strict_level <= -1 {
            while matches!(
                self.parser.get_slice(self.parser.position + end + 1, 1),
                Some([b' ' | b'\t'])
            ) {
                let next = self
                    .parser
                    .find_char_abs(
                        self.parser.position + end + 1,
                        self.req_limits.precalc.h_line,
                        b'\n',
                    )
                    .ok_or(ErrorKind::InvalidHeader)?;
                end = next - self.parser.position;
                folded = true;
            }
        }

        let parser = &mut self.parser;

        match parser.get_slice(parser.position + end - 1, 2) {
            Some([b'\r', b'\n']) if parser.has_crlf => {}
            Some([_, b'\n']) if !parser.has_crlf => {}
            _ => return Err(ErrorKind::InvalidHeader),
        }

        // HeaderName: Someone=data\r\n
        //           |
        let Some(split) = parser.find_char(end, b':') else {
            self.check_end_of_headers(end)?;
            return Ok(None);
        };

        if parser.get_slice(parser.position + split, 2) != Some(b": ") {
            return Err(ErrorKind::InvalidHeader);
        }

        let value_start = split + 2;
        let len_value = end - value_start - parser.has_crlf as usize;

        if split > self.req_limits.header_name_size || len_value > self.req_limits.header_value_size
        {
            return Err(ErrorKind::InvalidHeader);
        }

        let name = {
            let name = parser
                .get_slice_mut(parser.position, split)
                .ok_or(ErrorKind::InvalidHeader)?;

            if name.is_empty() {
                return Err(ErrorKind::InvalidHeader);
            }

            types::to_lower_case(name);
            unsafe { Parser::into_static(name) }
        };

        let value = {
            let raw = parser
                .get_slice_mut(parser.position + value_start, len_value)
                .ok_or(ErrorKind::InvalidHeader)?;

            let len = if folded { compact_obs_folds(raw) } else { raw.len() };
            unsafe { Parser::into_static(&raw[..len]) }
        };

        parser.update_position(end);

        Ok(Some(Header::new(name, value)))
    }

    #[inline]
    fn parse_special_header(&mut self, header: &Header) -> Result<bool, ErrorKind> {
        match header.name {
            b"content-length" => self.parse_content_length(header.value),
            b"connection" => self.parse_connection(header.value),
            _ => return Ok(false),
        }
        .map(|_| true)
    }

    // Auxiliary methods
    #[inline]
    fn check_end_of_headers(&mut self, start: usize) -> Result<(), ErrorKind> {
        let parser = &mut self.parser;
        // [\r, \n, \r, \n] or [x, x, \n, \n]
        let p_end = parser
            .get_slice(parser.position + start - 3, 4)
            .ok_or(ErrorKind::InvalidHeader)?;

        if !match parser.has_crlf {
            true => p_end.ends_with(b"\r\n\r\n"),
            false => p_end.ends_with(b"\n\n"),
        } {
            return Err(ErrorKind::InvalidHeader);
        }

        parser.position += parser.has_crlf as usize + 1;

        Ok(())
    }

    #[inline]
    fn parse_content_length(&mut self, value: &[u8]) -> Result<(), ErrorKind> {
        let len = types::slice_to_usize(value).ok_or(ErrorKind::InvalidContentLength)?;
        if len > self.req_limits.body_size {
            return Err(ErrorKind::BodyTooLarge);
        }

        match self.request.headers.content_length {
            Some(existing) if existing != len => return Err(ErrorKind::InvalidContentLength),
            Some(_) if self.req_limits.protocol_strict_level > 0 => {
                return Err(ErrorKind::InvalidContentLength);
            }
            _ => {}
        }

        self.request.headers.content_length = Some(len);
        Ok(())
    }

    /// Rejects `HTTP/1.1` requests missing a `Host` header.
    ///
    /// Tolerated at the default strictness level to keep this library usable
    /// against clients that omit it; set `protocol_strict_level > 0` to
    /// enforce [RFC 9112, Section 3.2](https://www.rfc-editor.org/rfc/rfc9112#section-3.2)
    /// to the letter.
    #[inline]
    fn check_host(&self) -> Result<(), ErrorKind> {
        if self.request.version == Version::Http11
            && !self.request.headers.has_host
            && self.req_limits.protocol_strict_level > 0
        {
            return Err(ErrorKind::MissingHost);
        }

        Ok(())
    }

    /// Parses a `Connection` header value as the comma-separated token list
    /// [RFC 9112, Section 6.1](https://www.rfc-editor.org/rfc/rfc9112#section-6.1)
    /// defines, rather than a single two-value enum. `upgrade` is accepted
    /// as one token among several (e.g. alongside `keep-alive`) so a
    /// standards-compliant `Upgrade: ...\r\nConnection: Upgrade\r\n` request
    /// reaches `Response::upgrade()` instead of being rejected here.
    #[inline]
    fn parse_connection(&mut self, value: &[u8]) -> Result<(), ErrorKind> {
        for token in value.split(|&b| b == b',') {
            let token = trim_ows(token);
            if token.is_empty() {
                continue;
            }

            let mut normalized = [0; 16];
            if token.len() > normalized.len() {
                return Err(ErrorKind::InvalidConnection);
            }
            let len = types::into_lower_case(token, &mut normalized);

            match &normalized[..len] {
                b"keep-alive" => self.response.keep_alive = true,
                b"close" => self.response.keep_alive = false,
                b"upgrade" => {}
                _ => return Err(ErrorKind::InvalidConnection),
            }
        }

        Ok(())
    }
}

/// Strips leading/trailing optional whitespace (space, tab) from a list
/// element, per the `OWS` production used throughout RFC 9110/9112.
#[inline]
fn trim_ows(value: &[u8]) -> &[u8] {
    let start = value
        .iter()
        .position(|&b| b != b' ' && b != b'\t')
        .unwrap_or(value.len());
    let end = value
        .iter()
        .rposition(|&b| b != b' ' && b != b'\t')
        .map_or(start, |pos| pos + 1);

    &value[start..end]
}

/// Collapses obs-fold continuation glue (a CRLF/LF followed by a run of
/// space/tab) found inside a header value into a single space, in place.
/// Returns the compacted length; the tail past it is left untouched.
#[inline]
fn compact_obs_folds(buf: &mut [u8]) -> usize {
    let mut read = 0;
    let mut write = 0;

    while read < buf.len() {
        match buf[read] {
            b'\r' | b'\n' => {
                let is_cr = buf[read] == b'\r';
                read += 1;
                if is_cr && buf.get(read) == Some(&b'\n') {
                    read += 1;
                }
                while matches!(buf.get(read), Some(b' ' | b'\t')) {
                    read += 1;
                }
                buf[write] = b' ';
                write += 1;
            }
            byte => {
                buf[write] = byte;
                write += 1;
                read += 1;
            }
        }
    }

    write
}

// Parse body
impl<H: Handler<S>, S: ConnectionData> HttpConnection<H, S> {
    #[inline]
    fn check_body(&mut self) -> Result<(), ErrorKind> {
        if self.request.headers.transfer_encoding_chunked {
            // A request framed both ways is a smuggling vector (RFC 9112 §6.1):
            // always reject it, regardless of protocol_strict_level.
            if self.request.headers.content_length.is_some() {
                return Err(ErrorKind::InvalidTransferEncoding);
            }

            return self.parse_chunked_body();
        }

        let parser = &self.parser;
        let body = parser.len - parser.position;

        match self.request.headers.content_length {
            Some(len) if len == body => {
                let slice = parser.get_slice_static(parser.position, len).ok_or(
                    ErrorKind::BodyMismatch {
                        expected: len,
                        available: body,
                    },
                )?;

                self.request.body = Some(slice);
                Ok(())
            }
            Some(len) => Err(ErrorKind::BodyMismatch {
                expected: len,
                available: body,
            }),
            None => match body == 0 {
                true => Ok(()),
                false => Err(ErrorKind::UnexpectedBody(body)),
            },
        }
    }

    /// Dechunks a `Transfer-Encoding: chunked` body in place.
    ///
    /// The connection buffer holds exactly one request per fill, so instead
    /// of streaming, chunk payloads are compacted leftward over the
    /// chunk-size lines and trailing CRLFs they replace (`write_pos` never
    /// runs ahead of `read_pos`, so the `copy_within` ranges never overlap
    /// in the wrong direction). Trailer headers after the terminating
    /// zero-size chunk are not supported; the body must end right after it.
    #[inline]
    fn parse_chunked_body(&mut self) -> Result<(), ErrorKind> {
        let crlf_len = if self.parser.has_crlf { 2 } else { 1 };
        let line_limit = self.req_limits.header_value_size;

        let start = self.parser.position;
        let mut read_pos = start;
        let mut write_pos = start;

        loop {
            let line_end = self
                .parser
                .find_char_abs(read_pos, line_limit, b'\n')
                .ok_or(ErrorKind::InvalidTransferEncoding)?;
            let content_end = line_end.saturating_sub(crlf_len - 1);

            let size_line = self
                .parser
                .get_slice(read_pos, content_end - read_pos)
                .ok_or(ErrorKind::InvalidTransferEncoding)?;
            let size_bytes = match memchr(b';', size_line) {
                Some(pos) => &size_line[..pos],
                None => size_line,
            };
            let size_str =
                std::str::from_utf8(size_bytes).map_err(|_| ErrorKind::InvalidTransferEncoding)?;
            let chunk_size = usize::from_str_radix(size_str.trim(), 16)
                .map_err(|_| ErrorKind::InvalidTransferEncoding)?;

            read_pos = line_end + 1;

            if chunk_size == 0 {
                let terminator = self
                    .parser
                    .get_slice(read_pos, crlf_len)
                    .ok_or(ErrorKind::InvalidTransferEncoding)?;
                let expected: &[u8] = if self.parser.has_crlf { b"\r\n" } else { b"\n" };

                if terminator != expected {
                    return Err(ErrorKind::InvalidTransferEncoding);
                }

                break;
            }

            let decoded_so_far = write_pos - start;
            if decoded_so_far + chunk_size > self.req_limits.body_size {
                return Err(ErrorKind::BodyTooLarge);
            }

            if read_pos + chunk_size + crlf_len > self.parser.len {
                return Err(ErrorKind::BodyMismatch {
                    expected: chunk_size,
                    available: self.parser.len.saturating_sub(read_pos),
                });
            }

            self.parser
                .buffer
                .copy_within(read_pos..read_pos + chunk_size, write_pos);
            write_pos += chunk_size;
            read_pos += chunk_size;

            let trailing = self
                .parser
                .get_slice(read_pos, crlf_len)
                .ok_or(ErrorKind::InvalidTransferEncoding)?;
            let expected: &[u8] = if self.parser.has_crlf { b"\r\n" } else { b"\n" };
            if trailing != expected {
                return Err(ErrorKind::InvalidTransferEncoding);
            }
            read_pos += crlf_len;
        }

        let total = write_pos - start;
        self.request.body = if total == 0 {
            None
        } else {
            Some(
                self.parser
                    .get_slice_static(start, total)
                    .ok_or(ErrorKind::InvalidTransferEncoding)?,
            )
        };

        Ok(())
    }
}

//

#[derive(Debug, Clone, PartialEq)]
#[repr(align(64))]
pub(crate) struct Parser {
    position: usize,
    len: usize,
    has_crlf: bool,
    buffer: Box<[u8]>,
}

impl Parser {
    #[inline(always)]
    pub(crate) fn new(limits: &ReqLimits) -> Self {
        let buffer = vec![0; limits.precalc.buffer].into_boxed_slice();

        Parser {
            position: 0,
            len: 0,
            has_crlf: false,
            buffer,
        }
    }

    #[cfg(test)]
    pub(crate) fn from<V: AsRef<[u8]>>(limits: &ReqLimits, value: V) -> Self {
        let mut buffer = vec![0; limits.precalc.buffer];

        let value = value.as_ref();
        buffer[0..value.len()].copy_from_slice(value);

        Parser {
            position: 0,
            len: value.len(),
            has_crlf: false,
            buffer: buffer.into_boxed_slice(),
        }
    }

    #[inline]
    pub(crate) fn reset(&mut self) {
        self.position = 0;
        self.len = 0;
        self.has_crlf = false;
        self.buffer.fill(0);
    }
}

// Work with Buffer
impl Parser {
    // Reading level
    #[inline]
    pub(crate) async fn fill_buffer(
        &mut self,
        stream: &mut Transport,
        time: Duration,
    ) -> Result<usize, io::Error> {
        tokio::select! {
            biased;

            read_result = stream.read(&mut self.buffer) => {
                let n = read_result?;
                self.len = n;
                Ok(n)
            }
            _ = sleep(time) => {
                Err(io::Error::new(io::ErrorKind::TimedOut, "read timeout"))
            },
        }
    }

    /// Appends more bytes past `self.len` instead of overwriting the buffer,
    /// for continuing to read a request whose body wasn't fully buffered by
    /// the initial [`fill_buffer`](Self::fill_buffer) call (e.g. after
    /// replying to `Expect: 100-continue`).
    ///
    /// Returns `0` once the buffer is full rather than erroring — the
    /// caller is responsible for treating a still-incomplete body against
    /// a full buffer as a [`BodyMismatch`](crate::errors::ErrorKind::BodyMismatch).
    #[inline]
    pub(crate) async fn fill_more(
        &mut self,
        stream: &mut Transport,
        time: Duration,
    ) -> Result<usize, io::Error> {
        if self.len >= self.buffer.len() {
            return Ok(0);
        }

        tokio::select! {
            biased;

            read_result = stream.read(&mut self.buffer[self.len..]) => {
                let n = read_result?;
                self.len += n;
                Ok(n)
            }
            _ = sleep(time) => {
                Err(io::Error::new(io::ErrorKind::TimedOut, "read timeout"))
            },
        }
    }

    /// Bytes read off the wire but not yet consumed by the parser — the
    /// start of whatever the client sent immediately after the request
    /// that triggered an HTTP Upgrade.
    #[inline]
    pub(crate) fn leftover(&self) -> &[u8] {
        &self.buffer[self.position..self.len]
    }

    // Search level
    #[inline]
    fn find_slice(&mut self, limit: usize, delimiter: u8) -> Option<&[u8]> {
        let step = self.find_char(limit, delimiter)?;
        let last_index = self.update_position(step);
        let slice = self.get_slice(last_index, step)?;
        Some(slice)
    }

    #[inline]
    fn find_char(&self, step: usize, delimiter: u8) -> Option<usize> {
        let slice = self.get_slice(self.position, step)?;
        memchr(delimiter, slice)
    }

    /// Like [`find_char`](Self::find_char), but scans from an absolute
    /// offset rather than the parser's current position, and returns an
    /// absolute index. Used while walking chunked-encoding framing, which
    /// advances past the request line/headers without touching `position`.
    #[inline]
    fn find_char_abs(&self, start: usize, step: usize, delimiter: u8) -> Option<usize> {
        let slice = self.get_slice(start, step)?;
        memchr(delimiter, slice).map(|pos| start + pos)
    }

    // Low level
    #[inline(always)]
    fn get_slice(&self, start: usize, step: usize) -> Option<&[u8]> {
        self.buffer.get(start..start + step)
    }

    #[inline(always)]
    fn get_slice_mut(&mut self, start: usize, step: usize) -> Option<&mut [u8]> {
        self.buffer.get_mut(start..start + step)
    }

    #[inline(always)]
    fn update_position(&mut self, step: usize) -> usize {
        let old = self.position;
        self.position += step + 1;
        old
    }

    // Unsafe level
    #[inline(always)]
    fn get_slice_static(&self, start: usize, step: usize) -> Option<&'static [u8]> {
        let value = self.get_slice(start, step)?;
        unsafe { Some(Self::into_static(value)) }
    }

    #[inline(always)]
    // SAFETY: into_static creates "temporary" references for tokio integration,
    // which become invalid after Request cleanup.
    // Parser: 'static (lives for entire program lifetime), buffer cleared via .fill(0).
    // Memory remains valid even if user holds references.
    // DO NOT SUGGEST FIXES without full server architecture context.
    const unsafe fn into_static(src: &[u8]) -> &'static [u8] {
        // Second `unsafe` for integration with the 2024 edition
        unsafe { mem::transmute(src) }
    }
}

#[cfg(test)]
mod request_self {
    use super::*;
    use crate::tools::*;

    #[test]
    fn reset() {
        let limits = ReqLimits::default();
        let mut t =
            HttpConnection::from_req("OPTIONS /qwe&q=1 HTTP/1.0\r\nHost: 127.0.0.1\r\n\r\n");

        assert_eq!(t.parse(), Ok(Version::Http10));
        t.request.reset();
        assert_eq!(Request::new(&limits), t.request);
    }

    #[test]
    fn parse_method() {
        #[rustfmt::skip]
        let cases = [
            ("GET /url",   Some(Method::Get)),
            ("GET ",       Some(Method::Get)),
            ("PUT ",       Some(Method::Put)),
            ("POST ",      Some(Method::Post)),
            ("HEAD ",      Some(Method::Head)),
            ("PATCH ",     Some(Method::Patch)),
            ("DELETE ",    Some(Method::Delete)),
            ("OPTIONS ",   Some(Method::Options)),

            ("GET",        None),
            ("PYU ",       None),
            ("GETGETGET ", None),
        ];

        for (method, expected) in cases {
            let mut t = HttpConnection::from_req(method);

            if let Some(expected) = expected {
                assert_eq!(t.parse_method(), Ok(()));
                assert_eq!(t.request.method(), expected);
            } else {
                assert_eq!(t.parse_method(), Err(ErrorKind::InvalidMethod));
            }
        }
    }

    #[test]
    fn parse_url() {
        #[rustfmt::skip]
        let cases = [
            ("/ ",             Some((vec![], vec![]))),
            ("/// ",           Some((vec![], vec![]))),
            ("/? ",            Some((vec![], vec![]))),
            ("/?/ ",           Some((vec!["?"], vec![]))),
            ("/?? ",           Some((vec![], vec![]))),
            ("/???? ",         Some((vec![], vec![]))),

            ("/api/user ",     Some((vec!["api", "user"], vec![]))),
            ("///api//user ",  Some((vec!["api", "user"], vec![]))),
            ("/api/qwe/name/len ",  Some((vec!["api", "qwe", "name", "len"], vec![]))),
            ("/api//user/// ", Some((vec!["api", "user"], vec![]))),
            ("/api//user//? ", Some((vec!["api", "user"], vec![]))),

            ("/api ",          Some((vec!["api"], vec![]))),
            ("///api ",        Some((vec!["api"], vec![]))),
            ("/api// ",        Some((vec!["api"], vec![]))),
            ("//api///? ",     Some((vec!["api"], vec![]))),

            (
                "/api/find?user=qwe&id=223 ", Some((vec!["api", "find"], 
                    vec![("user", "qwe"), ("id", "223")]
                ))
            ),
            (
                "/?user=qwe&id=223 ", Some((vec![], 
                    vec![("user", "qwe"), ("id", "223")]
                ))
            ),
            (
                "/?debug&name=&=Qwe&key=sda&&id=123 ", Some((vec![], 
                    vec![
                        ("debug", ""), ("name", ""), ("", "Qwe"), 
                        ("key", "sda"), ("", "Qwe"), ("id", "123")
                    ]
                ))
            ),
            (
                "/?a=1&a=2&a=3 ",
                Some((vec![], vec![("a", "1"), ("a", "1"), ("a", "1")]))
            ),
            (
                "/?very=long=value=with=equals ",
                Some((vec![], vec![("very", "long=value=with=equals")]))
            ),

            ("qwe ",           None),
            (" ",              None),
            ("qwe/qwe ",       None),
            ("/qwe",           None),
        ];

        for (url, expected) in cases {
            let mut t = HttpConnection::from_req(url);

            if let Some((url, query)) = expected {
                assert_eq!(t.parse_url(), Ok(()));

                url.iter().enumerate().for_each(|(i, value)| {
                    assert_eq!(str(t.request.url().path_segment(i)), Some(*value));
                });
                assert_eq!(str(t.request.url().path_segment(url.len())), None);

                query.iter().for_each(|(name, value)| {
                    assert_eq!(str(t.request.url().query(name.as_bytes())), Some(*value));
                });
            } else {
                assert_eq!(t.parse_url(), Err(ErrorKind::InvalidUrl));
            }
        }
    }

    #[test]
    fn parse_url_full() {
        let mut t = HttpConnection::from_req("/api/users/123?sort=name&debug ");
        let segments = &[b"api" as &[u8], b"users" as &[u8], b"123" as &[u8]] as &[&[u8]];

        assert_eq!(t.parse_url(), Ok(()));

        assert_eq!(
            str_op(t.request.url().target()),
            "/api/users/123?sort=name&debug"
        );
        assert_eq!(str_op(t.request.url().path()), "/api/users/123");

        assert!(t.request.url().matches(segments));
        assert!(t.request.url().starts_with(segments));
        assert!(t.request.url().starts_with(&segments[..1]));
        assert!(t.request.url().starts_with(&[]));
        assert!(t.request.url().ends_with(segments));
        assert!(t.request.url().ends_with(&segments[1..]));
        assert!(t.request.url().ends_with(&[]));

        assert_eq!(t.request.url().path_segments(), segments);
        assert_eq!(str(t.request.url().path_segment(0)), Some("api"));
        assert_eq!(str(t.request.url().path_segment(1)), Some("users"));
        assert_eq!(str(t.request.url().path_segment(2)), Some("123"));
        assert_eq!(str(t.request.url().path_segment(3)), None);

        assert_eq!(str(t.request.url().query_full()), Some("?sort=name&debug"));
        assert_eq!(str(t.request.url().query(b"sort")), Some("name"));
        assert_eq!(str(t.request.url().query(b"debug")), Some(""));
    }

    #[test]
    fn check_version() {
        #[rustfmt::skip]
        let cases = [
            ("HTTP/1.1\r\n e", Ok((Version::Http11, true))),
            ("HTTP/1.1\r\n",   Ok((Version::Http11, true))),
            ("HTTP/1.0\r\n",   Ok((Version::Http10, true))),
            ("HTTP/1.1\n",     Ok((Version::Http11, false))),
            ("HTTP/1.0\n",     Ok((Version::Http10, false))),

            ("HTTP/2.0\r\n",   Err(ErrorKind::UnsupportedVersion)),
            ("HTTP/0.9\r\n",   Err(ErrorKind::UnsupportedVersion)),
            ("http/1.1\r\n",   Err(ErrorKind::UnsupportedVersion)),

            ("HTTP/1.15\r\n",  Err(ErrorKind::InvalidVersion)),
            (" HTTP/1.1\r\n",  Err(ErrorKind::InvalidVersion)),
            ("HTTP/1.1\r \n",  Err(ErrorKind::InvalidVersion)),
            ("HTTP/1.1\r",     Err(ErrorKind::InvalidVersion)),
            ("HTTP/1.0\r",     Err(ErrorKind::InvalidVersion)),
            ("HTTP/1.\n",      Err(ErrorKind::InvalidVersion)),
            ("HTTP/1.1 ",      Err(ErrorKind::InvalidVersion)),
            ("HTTP/1.1",       Err(ErrorKind::InvalidVersion)),
            ("HTTP/1.",        Err(ErrorKind::InvalidVersion)),
            ("\r\n",           Err(ErrorKind::InvalidVersion)),
            ("\r",             Err(ErrorKind::InvalidVersion)),
            ("\n",             Err(ErrorKind::InvalidVersion)),
            (" ",              Err(ErrorKind::InvalidVersion)),
            ("",               Err(ErrorKind::InvalidVersion)),
        ];

        for (value, expected) in cases {
            let mut t = HttpConnection::from_req(value);

            if let Ok((version, has_crlf)) = expected {
                assert_eq!(t.check_version(), Ok(()));

                assert_eq!(t.request.version, version);
                assert_eq!(t.response.version, version);
                assert_eq!(t.parser.has_crlf, has_crlf);

                match t.request.version {
                    Version::Http11 => assert!(t.response.keep_alive),
                    Version::Http10 => assert!(!t.response.keep_alive),
                    Version::Http09 => assert!(!t.response.keep_alive),
                }
            } else if let Err(e) = expected {
                assert_eq!(t.check_version(), Err(e));
            }
        }
    }

    #[test]
    fn parse_header() {
        #[rustfmt::skip]
        let cases = [
            (true,  "HEADER: value\r\n", Some(("header", "value"))),
            (true,  "Header: value\r\n", Some(("header", "value"))),
            (true,  "header: value\r\n", Some(("header", "value"))),
            (true,  "header: \r\n",      Some(("header", ""))),

            (false, "HEADER: value\n",   Some(("header", "value"))),
            (false, "Header: value\n",   Some(("header", "value"))),
            (false, "header: value\n",   Some(("header", "value"))),
            (false, "header: \n",        Some(("header", ""))),
            (true,  "Header : v\r\n",    Some(("header ", "v"))),
            (false, "Header : v\n",      Some(("header ", "v"))),

            (true,  "Header: value\r",   None),
            (false, "Header: value\r",   None),
            (true,  "Header: value",     None),
            (false, "Header: value",     None),
            (true,  "header:value\n",    None),
            (false, "header:value\n",    None),
            (true,  "header:\n",         None),
            (false, "header:\n",         None),
            (true,  ": value\r\n",       None),
            (false, ": value\r\n",       None),
            (true,  ": \r\n",            None),
            (false, ": \r\n",            None),
            (true,  ": value\n",         None),
            (false, ": value\n",         None),
            (true,  ": \n",              None),
            (false, ": \n",              None),

            (false, "HEADER: value\r\n", Some(("header", "value\r"))),
            (false, "Header: value\r\n", Some(("header", "value\r"))),
            (false, "header: value\r\n", Some(("header", "value\r"))),
            (false, "header: \r\n",      Some(("header", "\r"))),
        ];

        for (has_crlf, header, expected) in cases {
            let mut t = HttpConnection::from_req(header);
            t.parser.has_crlf = has_crlf;

            if let Some((name, value)) = expected {
                let header = t.parse_header().unwrap().unwrap();

                assert_eq!(str_op(header.name), name);
                assert_eq!(str_op(header.value), value);
            } else {
                assert_eq!(t.parse_header(), Err(ErrorKind::InvalidHeader));
            }
        }
    }

    #[test]
    fn parse_headers() {
        #[rustfmt::skip]
        let cases = [
            (
                true, "HEADER: value\r\n\r\n",
                Some((vec!["HEADER", "HeAdEr", "header"], "value")),
            ),
            (
                false, "HEADER: value\n\n",
                Some((vec!["HEADER", "HeAdEr", "header"], "value")),
            ),
            (
                true, "HEADER: value\r\nQwE: value\r\nasd: value\r\n\r\n",
                Some((vec!["header", "qwe", "asd"], "value")),
            ),
            (
                false, "HEADER: value\nQwE: value\nasd: value\n\n",
                Some((vec!["header", "qwe", "asd"], "value")),
            ),
            (
                true, "Empty-Value: \r\n\r\n",
                Some((vec!["empty-value"], "")),
            ),
            (
                true, "Space-Value:   \r\n\r\n",
                Some((vec!["space-value"], "  ")),
            ),
            (
                true, "Multi: value1\r\nMulti: value2\r\n\r\n",
                Some((vec!["multi"], "value1")),
            ),

            (true, ": empty-name\r\n\r\n", None),
            (true, "No-Colon value\r\n\r\n", None),
            (
                true, "Valid: ok\r\nInvalidname\r\nNext: value\r\n\r\n",
                None,
            ),
            (true, "Header: value\n\n", None),
            (true, "No-Colon value\r\n\r\n", None),
            (
                true, "Valid: ok\r\nInvalidname\r\nNext: value\r\n\r\n",
                None,
            ),
        ];

        for (has_crlf, headers, expected) in cases {
            let mut t = HttpConnection::from_req(headers);
            t.parser.has_crlf = has_crlf;

            if let Some((names, value)) = expected {
                assert_eq!(t.parse_headers(), Ok(()));

                for name in names {
                    assert_eq!(str(t.request.header(name.as_bytes())), Some(value));
                }
            } else {
                assert_eq!(t.parse_headers(), Err(ErrorKind::InvalidHeader));
            }
        }
    }

    #[test]
    fn parse_special_header() {
        #[rustfmt::skip]
        let cases = [
            ("content-length: 1256\n\n", Ok((Some(1256), None))),
            ("content-length: 4096\n\n", Ok((Some(4096), None))),
            (
                "content-length: 1256\nconnection: keep-alive\n\n", 
                Ok((Some(1256), Some(true)))
            ),
            ("connection: keep-alive\n\n", Ok((None, Some(true)))),
            (
                "content-length: 1256\nconnection: close\n\n", 
                Ok((Some(1256), Some(false)))
            ),
            ("connection: close\n\n", Ok((None, Some(false)))),


            ("connection: keep_alive\n\n", Err(ErrorKind::InvalidConnection)),
            ("connection: qwerrew\n\n", Err(ErrorKind::InvalidConnection)),
            ("content-length: 12asd\n\n", Err(ErrorKind::InvalidContentLength)),
            ("content-length: 123u64\n\n", Err(ErrorKind::InvalidContentLength)),
            ("content-length: 4097\n\n", Err(ErrorKind::BodyTooLarge)),
            ("content-length: 123.9435\n\n", Err(ErrorKind::InvalidContentLength)),
            (
                "content-length: 999999999999999999999\n\n", 
                Err(ErrorKind::InvalidContentLength)
            ),
        ];

        for (headers, result) in cases {
            let mut t = HttpConnection::from_req(headers);

            if let Ok((content_length, keep_alive)) = result {
                assert_eq!(t.parse_headers(), Ok(()));
                assert!(t.request.headers.headers.is_empty());

                if let Some(len) = content_length {
                    assert_eq!(t.request.headers.content_length, Some(len));
                }
                if let Some(keep_alive) = keep_alive {
                    assert_eq!(t.response.keep_alive, keep_alive);
                }
            } else if let Err(e) = result {
                assert_eq!(t.parse_headers(), Err(e));
            }
        }
    }

    #[test]
    fn chunked_body() {
        #[rustfmt::skip]
        let cases = [
            (
                "GET / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n",
                Ok(Some(b"Wikipedia" as &[u8])),
            ),
            (
                "GET / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n0\r\n\r\n",
                Ok(None),
            ),
            (
                "GET / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n3;ext=1\r\nabc\r\n0\r\n\r\n",
                Ok(Some(b"abc" as &[u8])),
            ),
            (
                "GET / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\nzz\r\nabc\r\n0\r\n\r\n",
                Err(ErrorKind::InvalidTransferEncoding),
            ),
            (
                "GET / HTTP/1.1\r\nTransfer-Encoding: chunked\r\nContent-Length: 3\r\n\r\n3\r\nabc\r\n0\r\n\r\n",
                Err(ErrorKind::InvalidTransferEncoding),
            ),
        ];

        for (req, expected) in cases {
            let mut t = HttpConnection::from_req(req);

            assert_eq!(t.parse().map(|_| t.request.body()), expected);
        }
    }

    #[test]
    fn chunked_body_too_large() {
        let limits = ReqLimits::default().precalculate();
        let body = "a".repeat(limits.body_size + 1);
        let req = format!(
            "GET / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n{:x}\r\n{body}\r\n0\r\n\r\n",
            body.len()
        );

        let mut t = HttpConnection::from_req(req);
        assert_eq!(t.parse(), Err(ErrorKind::BodyTooLarge));
    }

    #[test]
    fn expect_and_upgrade_headers() {
        let mut t =
            HttpConnection::from_req("GET / HTTP/1.1\r\nExpect: 100-continue\r\n\r\n");
        assert_eq!(t.parse(), Ok(Version::Http11));
        assert!(t.request.expects_continue());
        assert!(!t.request.is_chunked());
        assert_eq!(t.request.upgrade_requested(), None);

        let mut t = HttpConnection::from_req(
            "GET / HTTP/1.1\r\nUpgrade: websocket\r\nConnection: upgrade\r\n\r\n",
        );
        assert_eq!(t.parse(), Ok(Version::Http11));
        assert_eq!(t.request.upgrade_requested(), Some(b"websocket" as &[u8]));

        let mut t = HttpConnection::from_req("GET / HTTP/1.1\r\nUpgrade: websocket\r\n\r\n");
        assert_eq!(t.parse(), Ok(Version::Http11));
        assert_eq!(t.request.upgrade_requested(), Some(b"websocket" as &[u8]));

        // Multiple Connection tokens, as a real upgrade client may send.
        let mut t = HttpConnection::from_req(
            "GET / HTTP/1.1\r\nUpgrade: websocket\r\nConnection: keep-alive, Upgrade\r\n\r\n",
        );
        assert_eq!(t.parse(), Ok(Version::Http11));
        assert_eq!(t.request.upgrade_requested(), Some(b"websocket" as &[u8]));
    }

    #[test]
    fn missing_host_strictness() {
        // Default strictness tolerates the missing Host header.
        let mut t = HttpConnection::from_req("GET / HTTP/1.1\r\n\r\n");
        assert_eq!(t.parse(), Ok(Version::Http11));

        // Stricter-than-default requires it.
        let mut t = HttpConnection::from_req("GET / HTTP/1.1\r\n\r\n");
        t.req_limits.protocol_strict_level = 1;
        assert_eq!(t.parse(), Err(ErrorKind::MissingHost));

        let mut t = HttpConnection::from_req("GET / HTTP/1.1\r\nHost: example.com\r\n\r\n");
        t.req_limits.protocol_strict_level = 1;
        assert_eq!(t.parse(), Ok(Version::Http11));

        // HTTP/1.0 never requires Host regardless of strictness.
        let mut t = HttpConnection::from_req("GET / HTTP/1.0\r\n\r\n");
        t.req_limits.protocol_strict_level = 1;
        assert_eq!(t.parse(), Ok(Version::Http10));
    }

    #[test]
    fn duplicate_content_length() {
        // Same value twice is tolerated by default.
        let mut t = HttpConnection::from_req(
            "POST / HTTP/1.1\r\nContent-Length: 3\r\nContent-Length: 3\r\n\r\nabc",
        );
        assert_eq!(t.parse(), Ok(Version::Http11));
        assert_eq!(t.request.body(), Some(b"abc" as &[u8]));

        // Conflicting values are always rejected.
        let mut t = HttpConnection::from_req(
            "POST / HTTP/1.1\r\nContent-Length: 3\r\nContent-Length: 4\r\n\r\nabc",
        );
        assert_eq!(t.parse(), Err(ErrorKind::InvalidContentLength));

        // Strict mode rejects even a repeated identical value.
        let mut t = HttpConnection::from_req(
            "POST / HTTP/1.1\r\nContent-Length: 3\r\nContent-Length: 3\r\n\r\nabc",
        );
        t.req_limits.protocol_strict_level = 1;
        assert_eq!(t.parse(), Err(ErrorKind::InvalidContentLength));
    }

    #[test]
    fn obs_fold_headers() {
        // Rejected outright at default strictness.
        let mut t = HttpConnection::from_req(
            "GET / HTTP/1.1\r\nHost: x\r\nX-Long: one\r\n two\r\n\r\n",
        );
        assert_eq!(t.parse(), Err(ErrorKind::InvalidHeader));

        // Merged into a single space-joined value once relaxed.
        let mut t = HttpConnection::from_req(
            "GET / HTTP/1.1\r\nHost: x\r\nX-Long: one\r\n two\r\n\r\n",
        );
        t.req_limits.protocol_strict_level = -1;
        assert_eq!(t.parse(), Ok(Version::Http11));
        assert_eq!(str(t.request.header(b"x-long")), Some("one two"));

        // Multiple continuation lines compact in sequence.
        let mut t = HttpConnection::from_req(
            "GET / HTTP/1.1\r\nHost: x\r\nX-Long: a\r\n\tb\r\n  c\r\n\r\n",
        );
        t.req_limits.protocol_strict_level = -1;
        assert_eq!(t.parse(), Ok(Version::Http11));
        assert_eq!(str(t.request.header(b"x-long")), Some("a b c"));
    }

    macro_rules! parse_request {
        ($cases:expr) => {
            for (req, result) in $cases {
                let mut t = HttpConnection::from_req(req);

                if let Ok(result) = result {
                    assert_eq!(t.parse(), Ok(result.2));

                    assert_eq!(t.request.method(), result.0);
                    assert_eq!(str_op(t.request.url().target()), result.1);
                    assert_eq!(t.response.version, result.2);

                    for (name, value) in result.3 {
                        assert_eq!(
                            str(t.request.header(name.as_bytes())),
                            Some(value.to_string()).as_deref()
                        );
                    }
                    assert_eq!(t.request.body(), result.4);
                    assert_eq!(t.response.keep_alive, result.5);
                } else if let Err(e) = result {
                    assert_eq!(t.parse(), Err(e));
                }
            }
        };
    }

    #[test]
    fn parse_valid_request() {
        #[rustfmt::skip]
        let cases = vec![
            (
                "GET / HTTP/1.1\r\n\r\n",
                Ok((
                    Method::Get, "/", Version::Http11, 
                    vec![], 
                    None, true
                )),
            ),
            (
                "GET /api/qwe/name/len/qwe HTTP/1.1\r\n\r\n",
                Ok((
                    Method::Get, "/api/qwe/name/len/qwe", Version::Http11, 
                    vec![], 
                    None, true
                )),
            ),
            (
                "GET / HTTP/1.1\n\n",
                Ok((
                    Method::Get, "/", Version::Http11, 
                    vec![], 
                    None, true
                )),
            ),
            (
                "POST /test HTTP/1.1\r\nHOST: 127.0.0.1\r\n\r\n",
                Ok((
                    Method::Post, "/test", Version::Http11,
                    vec![("host", "127.0.0.1")],
                    None, true,
                )),
            ),
            (
                "PUT /qwe HTTP/1.1\r\nHoSt: 127.0.0.1\r\nUser-Agent: curl\r\n\r\n",
                Ok((
                    Method::Put, "/qwe", Version::Http11,
                    vec![("host", "127.0.0.1"), ("user-agent", "curl")],
                    None, true,
                )),
            ),
            (
                "GET /file HTTP/1.1\ncontent-length: 12\n\nHello world!",
                Ok((
                    Method::Get, "/file", Version::Http11,
                    vec![],
                    Some(b"Hello world!" as &[u8]), true,
                )),
            ),
            (
                "HEAD / HTTP/1.1\r\nConnection: keep-alive\r\n\r\n",
                Ok((
                    Method::Head, "/", Version::Http11, 
                    vec![], 
                    None, true
                )),
            ),
            (
                "OPTIONS / HTTP/1.1\r\nCoNNEctIon: close\r\n\r\n",
                Ok((
                    Method::Options, "/", Version::Http11, 
                    vec![], 
                    None, false
                )),
            ),
            (
                "PATCH / HTTP/1.0\r\nconnection: keep-alive\r\n\r\n",
                Ok((
                    Method::Patch, "/", Version::Http10, 
                    vec![], 
                    None, true
                )),
            ),
            (
                "DELETE / HTTP/1.0\r\nConnection: close\r\n\r\n",
                Ok((
                    Method::Delete, "/", Version::Http10, 
                    vec![], 
                    None, false
                )),
            ),
            (
                "GET / HTTP/1.0\r\n\r\n",
                Ok((
                    Method::Get, "/", Version::Http10, 
                    vec![], 
                    None, false
                )),
            ),
            (
"POST /upload HTTP/1.1\r\nContent-Type: application/json\r
Content-Length: 17\r\n\r\n{\"data\": \"value\"}",
                Ok((
                    Method::Post, "/upload", Version::Http11,
                    vec![("content-type", "application/json")],
                    Some(b"{\"data\": \"value\"}" as &[u8]), true,
                )),
            ),
            (
                "GET /empty HTTP/1.1\r\nX-Empty: \r\nX-Space: \r\n\r\n",
                Ok((
                    Method::Get, "/empty", Version::Http11,
                    vec![("x-empty", ""), ("x-space", "")],
                    None, true,
                )),
            ),
        ];

        parse_request! { cases }
    }

    #[test]
    fn parse_invalid_request() {
        #[rustfmt::skip]
        let cases = vec![
            (
                "GET / HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n",
                Ok((
                    Method::Get, "/", Version::Http11, 
                    vec![("Host", "127.0.0.1")], 
                    None::<&[u8]>, true
                )),
            ),
            (
                " GET/ HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n", 
                Err(ErrorKind::InvalidMethod)
            ),
            (
                "GET/ HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n", 
                Err(ErrorKind::InvalidMethod)
            ),
            (
                "GET", 
                Err(ErrorKind::InvalidMethod)
            ),
            (
                "GET ", 
                Err(ErrorKind::InvalidUrl)
            ),
            (
                "GET  HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n", 
                Err(ErrorKind::InvalidUrl)
            ),
            (
                "GET /\r\n", // Without HTTTP/0.9+ limits
                Err(ErrorKind::InvalidUrl)
            ),
            (
                "GET /HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n", 
                Err(ErrorKind::InvalidVersion)
            ),
            (
                "GET / HTTP/1.1 \r\nHost: 127.0.0.1\r\n\r\n", 
                Err(ErrorKind::InvalidVersion)
            ),
            (
                "GET /HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n", 
                Err(ErrorKind::InvalidVersion)
            ),
            (
                "GET / HTTP/1.1\r\nHost: 127.0.0.1\n\r\n", 
                Err(ErrorKind::InvalidHeader)
            ),
            (
                "GET / HTTP/1.1\nHost: 127.0.0.1\r\n\r\n", 
                Err(ErrorKind::InvalidHeader)
            ),
            (
                "GET / HTTP/1.1\r\nHost: 127.0.0.1\nq: w\r\n\r\n", 
                Err(ErrorKind::InvalidHeader)
            ),
            (
                "GET /empty HTTP/1.1\r\nX-Empty:\r\nX-Space: \r\n\r\n", 
                Err(ErrorKind::InvalidHeader)
            ),
            (
                "GET / HTTP/1.1\r\nQ: w\n\n", 
                Err(ErrorKind::InvalidHeader)
            ),
            (
                "GET / HTTP/1.1\r\nQ: w\r\nW: w\n\n", 
                Err(ErrorKind::InvalidHeader)
            ),
            (
                "POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\nshort",
                Err(ErrorKind::BodyMismatch { expected: 10, available: 5 }),
            ),
            (
                "POST / HTTP/1.1\r\nContent-Length: 999999999\r\n\r\nbody",
                Err(ErrorKind::BodyTooLarge),
            ),
            (
                "POST / HTTP/1.1\r\nContent-Length: invalid\r\n\r\nbody",
                Err(ErrorKind::InvalidContentLength),
            ),
        ];

        parse_request! { cases }
    }

    #[test]
    fn parse_http09() {
        use crate::limits::Http09Limits;

        #[rustfmt::skip]
        let cases = vec![
            (
                "GET / HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n",
                Ok((Version::Http11, "/", true)),
            ),
            (
                "GET /qwe HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n",
                Ok((Version::Http11, "/qwe", true)),
            ),

            (
                "GET /qwe\r\n", Ok((Version::Http09, "/qwe", false))
            ),
            (
                "GET /q/w/r\r\n", Ok((Version::Http09, "/q/w/r", false))
            ),
            (
                "GET /q/w/r/\r\n", Ok((Version::Http09, "/q/w/r/", false))
            ),
            (
                "GET /\r\n", Ok((Version::Http09, "/", false))
            ),
            (
                "GET /keep_alive/\r\n", Ok((Version::Http09, "/", true))
            ),
            (
                "GET /keep_alive/url\r\n", Ok((Version::Http09, "/url", true))
            ),
            (
                "GET /keep_alive//double/slash\r\n", 
                Ok((Version::Http09, "//double/slash", true))
            ),
            (
                "GET /keep_alive/%20encoded\r\n", 
                Ok((Version::Http09, "/%20encoded", true))
            ),
            (
                "GET /path?query=1\r\n",
                Ok((Version::Http09, "/path?query=1", false))
            ),
            (
                "GET /keep_alive/path?query=1&q=2\r\n", 
                Ok((Version::Http09, "/path?query=1&q=2", true))
            ),
            (
                "GET /?query\r\n",
                Ok((Version::Http09, "/?query", false))
            ),

            (
                "GET \r\n",  Err(ErrorKind::InvalidUrl)
            ),
            (
                "POST /path\r\n", Err(ErrorKind::InvalidUrl)
            ),
            (
                "GET /keep_alive\r\n",  Err(ErrorKind::InvalidUrl)
            ),
            (
                "GET /keep_alive\r\npath\r\n", Err(ErrorKind::InvalidUrl)
            ),
        ];

        for (req, result) in cases {
            let mut t = HttpConnection::from_req(req);
            t.http_09_limits = Some(Http09Limits::default());

            if let Ok(result) = result {
                assert_eq!(t.parse(), Ok(result.0));

                assert_eq!(t.request.method(), Method::Get);
                assert_eq!(str_op(t.request.url().target()), result.1);
                assert_eq!(t.response.version, result.0);
                assert_eq!(t.response.keep_alive, result.2);
            } else if let Err(e) = result {
                assert_eq!(t.parse(), Err(e));
            }
        }
    }

    #[test]
    fn check_limits() {
        use crate::query::Error as Qerror;

        let limits = ReqLimits::default().precalculate();

        let def_url = "/".to_string();
        let url_size = format!("/{}", "q".repeat(limits.url_size - 1));
        let url_parts = "/q".repeat(limits.url_parts + 1);
        let url_query_parts = format!("/?{}", vec!["q=w"; limits.url_query_parts].join("&"));

        let h_name = "N".repeat(limits.header_name_size);
        let h_value = "v".repeat(limits.header_value_size);

        let body = "b".repeat(limits.body_size);

        #[rustfmt::skip]
        let cases = vec![
            (
                format!("GET {} HTTP/1.1\n\n", url_size),
                Ok((
                    Method::Get, &url_size, Version::Http11, 
                    vec![],
                    None, true
                )),
            ),
            (
                format!("GET {url_size}e HTTP/1.1\n\n"),
                Err(ErrorKind::UriTooLong),
            ),
            (
                format!("GET {} HTTP/1.1\r\n\r\n",  url_parts),
                Ok((
                    Method::Get, &url_parts, Version::Http11, 
                    vec![],
                    None, true
                )),
            ),
            (
                format!("GET {url_parts}/e HTTP/1.1\r\n\r\n"),
                Err(ErrorKind::InvalidUrl),
            ),
            (
                format!("GET {} HTTP/1.1\n\n", url_query_parts),
                Ok((
                    Method::Get, &url_query_parts, Version::Http11, 
                    vec![],
                    None, true
                )),
            ),
            (
                format!(
                    "GET /?{} HTTP/1.1\n\n", 
                    vec!["q=w"; limits.url_query_parts + 1].join("&")
                ),
                Err(ErrorKind::Query(
                    Qerror::OverLimit(limits.url_query_parts)
                )),
            ),
            
            (
                format!("GET / HTTP/1.1\r\n{h_name}: {h_value}\r\n\r\n"),
                Ok((
                    Method::Get, &def_url, Version::Http11, 
                    vec![(&h_name, &h_value)],
                    None, true
                )),
            ),
            (
                format!("GET / HTTP/1.1\r\n{h_name}e: value\r\n\n"),
                Err(ErrorKind::InvalidHeader),
            ),
            (
                format!("GET / HTTP/1.1\r\nName: {h_value}e\r\n\r\n"),
                Err(ErrorKind::InvalidHeader),
            ),
            (
                format!(
                    "GET / HTTP/1.1\r\n{}\r\n", 
                    format!("{h_name}: {h_value}\r\n")
                        .repeat(limits.header_count)
                ),
                Ok((
                    Method::Get, &def_url, Version::Http11, 
                    vec![(&h_name, &h_value); limits.header_count],
                    None, true
                )),
            ),
            (
                format!(
                    "GET / HTTP/1.1\r\n{}\r\n", 
                    format!("{h_name}: {h_value}\r\n")
                        .repeat(limits.header_count + 1)
                ),
                Err(ErrorKind::TooManyHeaders),
            ),
            
            (
                format!(
                    "GET / HTTP/1.1\nContent-Length: {}\n\n{body}", 
                    limits.body_size
                ),
                Ok((
                    Method::Get, &def_url, Version::Http11, 
                    vec![],
                    Some(body.as_bytes()), true
                )),
            ),
            (
                format!(
                    "GET / HTTP/1.1\nContent-Length: {}\n\n{body}e", 
                    limits.body_size + 1,
                ),
                Err(ErrorKind::BodyTooLarge),
            ),
            
            (
                format!(
    "OPTIONS {url_size} HTTP/1.1\r\nContent-Length: {}\r\n{}\r\n{body}",
                    limits.body_size,
                    &format!("{h_name}: {h_value}\r\n")
                        .repeat(limits.header_count - 1)[22..]
                ),
                Ok((
                    Method::Options, &url_size, Version::Http11,
                    vec![(&h_name, &h_value); limits.header_count - 1],
                    Some(body.as_bytes()), true
                ))
            )
        ];

        parse_request! { cases }
    }
}
