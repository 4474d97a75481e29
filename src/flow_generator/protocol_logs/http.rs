/*
 * Copyright (c) 2024 Yunshan Networks
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use std::{collections::VecDeque, str};

use serde::Serialize;

use public::{bytes::ByteCursor, l7_protocol::L7Protocol};

use super::{consts::*, L7ProtocolEvent, L7RequestKey, ProtocolEventAggregators};
use crate::{
    common::l7_protocol_log::{
        L7Message, L7ProtocolInfoInterface, L7ProtocolParserInterface, ParseParam,
    },
    flow_generator::{
        aggregator::ProtocolAggregator,
        error::{Error, Result},
        perf::Slot,
    },
};

const HTTP_METHODS: [&'static str; 15] = [
    "GET",
    "POST",
    "PUT",
    "DELETE",
    "OPTIONS",
    "HEAD",
    "TRACE",
    "CONNECT",
    "PATCH",
    "LINK",
    "UNLINK",
    "COPY",
    "MOVE",
    "WRAPPED",
    "EXTENSION-METHOD",
];
const RESPONSE_PREFIX: &'static str = "HTTP/";
const PENDING_METHODS_MAX: usize = 32;

// 0 is HTTP/1.0, 1 is HTTP/1.1
#[derive(Serialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub version: u8,
    pub host: String,
    pub header_count: usize,
    pub content_length: Option<usize>,
    pub chunked: bool,
}

#[derive(Serialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub version: u8,
    pub status_code: u16,
    pub reason: String,
    pub server: String,
    pub header_count: usize,
    pub content_length: Option<usize>,
    pub chunked: bool,
}

impl L7ProtocolInfoInterface for HttpRequest {}
impl L7ProtocolInfoInterface for HttpResponse {}

#[derive(Default)]
struct Headers {
    count: usize,
    host: String,
    server: String,
    content_length: Option<usize>,
    chunked: bool,
}

// One per connection. Methods of requests that have not been answered yet are kept in
// order, so that a response to HEAD ends with its headers.
#[derive(Clone, Debug, Default)]
pub struct HttpLog {
    pending_methods: VecDeque<String>,
}

impl HttpLog {
    fn parse_request(
        &mut self,
        line: &str,
        cursor: &mut ByteCursor,
        truncated: bool,
    ) -> Result<HttpRequest> {
        let (method, url, version) = get_http_request_info(line)?;
        check_http_method(method)?;
        let version = get_http_request_version(version)?;
        let headers = parse_headers(cursor, truncated)?;
        check_body(cursor, &headers, truncated)?;

        if self.pending_methods.len() >= PENDING_METHODS_MAX {
            self.pending_methods.pop_front();
        }
        self.pending_methods.push_back(method.to_owned());
        Ok(HttpRequest {
            method: method.to_owned(),
            path: url.split('?').next().unwrap_or_default().to_owned(),
            version,
            host: headers.host,
            header_count: headers.count,
            content_length: headers.content_length,
            chunked: headers.chunked,
        })
    }

    fn parse_response(
        &mut self,
        line: &str,
        cursor: &mut ByteCursor,
        truncated: bool,
    ) -> Result<HttpResponse> {
        let (version, status_code) = get_http_resp_info(line)?;
        let reason = line
            .get(HTTP_RESP_MIN_LEN..)
            .unwrap_or_default()
            .trim()
            .to_owned();
        let headers = parse_headers(cursor, truncated)?;
        let head = self
            .pending_methods
            .front()
            .map(|m| m == "HEAD")
            .unwrap_or_default();
        if !head && !is_bodiless_status(status_code) {
            check_body(cursor, &headers, truncated)?;
        }

        // an interim 1xx response is followed by the final one for the same request
        if !is_informational(status_code) {
            self.pending_methods.pop_front();
        }
        Ok(HttpResponse {
            version,
            status_code,
            reason,
            server: headers.server,
            header_count: headers.count,
            content_length: headers.content_length,
            chunked: headers.chunked,
        })
    }
}

impl L7ProtocolParserInterface for HttpLog {
    type Request = HttpRequest;
    type Response = HttpResponse;

    fn check_payload(&self, payload: &[u8], _: &ParseParam) -> bool {
        if !is_http_v1_payload(payload) {
            return false;
        }
        let mut cursor = ByteCursor::big_endian(payload);
        let line = cursor.read_until(HTTP_LINE_END, false);
        let Ok(line) = str::from_utf8(line) else {
            return false;
        };
        if line.starts_with(RESPONSE_PREFIX) {
            get_http_resp_info(line).is_ok()
        } else {
            is_http_req_line(line)
        }
    }

    fn parse_payload(
        &mut self,
        payload: &[u8],
        param: &ParseParam,
    ) -> Result<L7Message<HttpRequest, HttpResponse>> {
        if !is_http_v1_payload(payload) {
            return Err(Error::HttpHeaderParseFailed);
        }
        let mut cursor = ByteCursor::big_endian(payload);
        let line = cursor.read_until(HTTP_LINE_END, true);
        if !cursor.ok() {
            return if param.truncated {
                Err(Error::HttpHeaderParseFailed)
            } else {
                Err(Error::NeedMoreData)
            };
        }
        let line = str::from_utf8(line)?;
        if line.starts_with(RESPONSE_PREFIX) {
            self.parse_response(line, &mut cursor, param.truncated).map(L7Message::Response)
        } else {
            self.parse_request(line, &mut cursor, param.truncated).map(L7Message::Request)
        }
    }

    fn protocol(&self) -> L7Protocol {
        L7Protocol::Http1
    }
}

impl L7ProtocolEvent for HttpLog {
    type Key = L7RequestKey;

    fn event_key(req: &Slot<HttpRequest>, resp: &Slot<HttpResponse>) -> Option<L7RequestKey> {
        Some(L7RequestKey {
            version: req.value.version.to_string(),
            req_domain: req.value.host.clone(),
            req_type: req.value.method.clone(),
            req_resource: req.value.path.clone(),
            resp_code: resp.value.status_code as i32,
        })
    }

    fn aggregator(aggs: &mut ProtocolEventAggregators) -> &mut ProtocolAggregator<L7RequestKey> {
        &mut aggs.http
    }
}

// Reads header lines up to the empty line. A missing empty line means the rest of the headers
// is in a later packet, unless capture cut the message.
fn parse_headers(cursor: &mut ByteCursor, truncated: bool) -> Result<Headers> {
    let mut headers = Headers::default();
    loop {
        let line = cursor.read_until(HTTP_LINE_END, true);
        if !cursor.ok() {
            if truncated {
                return Ok(headers);
            }
            return Err(Error::NeedMoreData);
        }
        if line.is_empty() {
            return Ok(headers);
        }
        headers.count += 1;
        let Ok(line) = str::from_utf8(line) else {
            continue;
        };
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let (name, value) = (name.trim(), value.trim());
        if name.eq_ignore_ascii_case("host") {
            headers.host = value.to_owned();
        } else if name.eq_ignore_ascii_case("server") {
            headers.server = value.to_owned();
        } else if name.eq_ignore_ascii_case("content-length") {
            headers.content_length =
                Some(value.parse().map_err(|_| Error::HttpHeaderParseFailed)?);
        } else if name.eq_ignore_ascii_case("transfer-encoding") {
            headers.chunked = value.eq_ignore_ascii_case("chunked");
        }
    }
}

fn check_body(cursor: &mut ByteCursor, headers: &Headers, truncated: bool) -> Result<()> {
    if truncated || !cursor.ok() {
        return Ok(());
    }
    let body = cursor.read_remaining();
    if headers.chunked {
        if !body.ends_with(HTTP_CHUNKED_END) {
            return Err(Error::NeedMoreData);
        }
    } else if headers.content_length.unwrap_or_default() > body.len() {
        return Err(Error::NeedMoreData);
    }
    Ok(())
}

fn is_informational(status_code: u16) -> bool {
    (100..200).contains(&status_code)
}

// RFC 7230 3.3.3: 1xx, 204 and 304 never carry a body whatever Content-Length says
fn is_bodiless_status(status_code: u16) -> bool {
    is_informational(status_code) || status_code == 204 || status_code == 304
}

pub fn is_http_v1_payload(buf: &[u8]) -> bool {
    if buf.starts_with(RESPONSE_PREFIX.as_bytes()) {
        return true;
    }
    for m in HTTP_METHODS {
        if buf.starts_with(m.as_bytes()) {
            return true;
        }
    }
    false
}

// check first line is http request line
pub fn is_http_req_line(line: &str) -> bool {
    if line.len() < "GET / HTTP/1.1".len() {
        return false;
    }

    for i in HTTP_METHODS.iter() {
        if line.starts_with(i) {
            return match line.get(line.len() - HTTP_V1_VERSION_LEN..) {
                Some("HTTP/0.9") | Some(HTTP_V1_0_VERSION) | Some(HTTP_V1_1_VERSION) => true,
                _ => false,
            };
        }
    }
    false
}

// 参考：https://www.w3.org/Protocols/rfc2616/rfc2616-sec9.html
pub fn check_http_method(method: &str) -> Result<()> {
    match method {
        "OPTIONS" | "GET" | "HEAD" | "POST" | "PUT" | "DELETE" | "TRACE" | "CONNECT" | "PATCH" => {
            Ok(())
        }
        _ => Err(Error::HttpHeaderParseFailed),
    }
}

pub fn get_http_request_version(version: &str) -> Result<u8> {
    match version {
        HTTP_V1_0_VERSION => Ok(0),
        HTTP_V1_1_VERSION => Ok(1),
        _ => Err(Error::HttpHeaderParseFailed),
    }
}

pub fn get_http_request_info(line_info: &str) -> Result<(&str, &str, &str)> {
    let mut iter = line_info.splitn(3, |c: char| c.is_ascii_whitespace());
    match (iter.next(), iter.next(), iter.next()) {
        (Some(method), Some(path), Some(version)) => Ok((method, path, version.trim())),
        _ => Err(Error::HttpHeaderParseFailed),
    }
}

pub fn get_http_resp_info(line_info: &str) -> Result<(u8, u16)> {
    const CODE_OFFSET: usize = HTTP_V1_VERSION_LEN + 1;
    const CODE_LEN: usize = 3;
    if line_info.len() < HTTP_RESP_MIN_LEN || !line_info.is_ascii() {
        return Err(Error::HttpHeaderParseFailed);
    }
    // HTTP response line: HTTP/1.1 404 Not Found.
    let version = get_http_request_version(&line_info[..HTTP_V1_VERSION_LEN])?;

    let Ok(status_code) = line_info[CODE_OFFSET..CODE_OFFSET + CODE_LEN].parse::<u16>() else {
        return Err(Error::HttpHeaderParseFailed);
    };
    if status_code < HTTP_STATUS_CODE_MIN || status_code > HTTP_STATUS_CODE_MAX {
        return Err(Error::HttpHeaderParseFailed);
    }
    Ok((version, status_code))
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::common::l7_protocol_log::LogMessageType;

    const REQUEST: &[u8] = b"POST /a HTTP/1.1\r\n\
        Host: ocs-oneagent-server.alibaba.com\r\n\
        User-Agent: Go-http-client/1.1\r\n\
        Content-Length: 1475\r\n\
        Content-Type: application/json\r\n\
        X-Log-Apiversion: 0.6.0\r\n\
        X-Log-Bodyrawsize: 1475\r\n\
        X-Log-Compresstype: lz4\r\n\
        Accept-Encoding: gzip\r\n\r\n";

    const RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\n\
        Server: Tengine\r\n\
        Content-Length: 0\r\n\
        Connection: close\r\n\
        Access-Control-Allow-Origin: *\r\n\
        Date: Sun, 19 Jun 2022 13:36:44 GMT\r\n\
        x-log-append-meta: true\r\n\
        x-log-time: 1655645804\r\n\
        x-log-requestid: 62AF266CFF534E3CBFEB7970\r\n\r\n";

    fn param(truncated: bool) -> ParseParam {
        ParseParam {
            truncated,
            ..Default::default()
        }
    }

    #[test]
    fn request_waits_for_body() {
        assert_eq!(
            HttpLog::default().parse_payload(REQUEST, &param(false)),
            Err(Error::NeedMoreData)
        );

        let L7Message::Request(req) = HttpLog::default().parse_payload(REQUEST, &param(true)).unwrap() else {
            panic!("not a request");
        };
        assert_eq!(req.method, "POST");
        assert_eq!(req.path, "/a");
        assert_eq!(req.version, 1);
        assert_eq!(req.host, "ocs-oneagent-server.alibaba.com");
        assert_eq!(req.header_count, 8);
        assert_eq!(req.content_length, Some(1475));
    }

    #[test]
    fn response() {
        let L7Message::Response(resp) = HttpLog::default().parse_payload(RESPONSE, &param(false)).unwrap()
        else {
            panic!("not a response");
        };
        assert_eq!(resp.status_code, 200);
        assert_eq!(resp.version, 1);
        assert_eq!(resp.reason, "OK");
        assert_eq!(resp.server, "Tengine");
        assert_eq!(resp.header_count, 8);
    }

    #[test]
    fn chunked_body_ends_with_last_chunk() {
        let head = b"HTTP/1.0 404 Not Found\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n";
        assert_eq!(
            HttpLog::default().parse_payload(head, &param(false)),
            Err(Error::NeedMoreData)
        );
        let mut full = head.to_vec();
        full.extend_from_slice(b"0\r\n\r\n");
        let L7Message::Response(resp) = HttpLog::default().parse_payload(&full, &param(false)).unwrap() else {
            panic!("not a response");
        };
        assert_eq!(resp.status_code, 404);
        assert_eq!(resp.version, 0);
        assert!(resp.chunked);
    }

    #[test]
    fn query_string_is_not_part_of_the_resource() {
        let payload = b"GET /api/v1/users?id=3 HTTP/1.1\r\nhost: example.com \r\n\r\n";
        let L7Message::Request(req) = HttpLog::default().parse_payload(payload, &param(false)).unwrap() else {
            panic!("not a request");
        };
        assert_eq!(req.path, "/api/v1/users");
        assert_eq!(req.host, "example.com");

        let key = HttpLog::event_key(
            &Slot::new(req, 10, payload.len() as u32),
            &Slot::new(
                HttpResponse {
                    status_code: 503,
                    ..Default::default()
                },
                20,
                10,
            ),
        )
        .unwrap();
        assert_eq!(key.version, "1");
        assert_eq!(key.req_type, "GET");
        assert_eq!(key.req_domain, "example.com");
        assert_eq!(key.resp_code, 503);
    }

    #[test]
    fn malformed_lines() {
        assert!(HttpLog::default()
            .parse_payload(b"GET / HTTP/2.0\r\n\r\n", &param(false))
            .is_err());
        assert!(HttpLog::default()
            .parse_payload(b"HTTP/1.1 099 Weird\r\n\r\n", &param(false))
            .is_err());
        assert!(HttpLog::default()
            .parse_payload(b"\x16\x03\x01\x02\x00", &param(false))
            .is_err());
        // the request line is still in flight
        assert_eq!(
            HttpLog::default().parse_payload(b"GET /index.ht", &param(false)),
            Err(Error::NeedMoreData)
        );
    }

    #[test]
    fn check() {
        let p = ParseParam {
            msg_type: LogMessageType::Request,
            ..Default::default()
        };
        assert!(HttpLog::default().check_payload(REQUEST, &p));
        assert!(HttpLog::default().check_payload(RESPONSE, &p));
        assert!(!HttpLog::default().check_payload(b"GETX", &p));
        assert!(!HttpLog::default().check_payload(b"*1\r\n$4\r\nPING\r\n", &p));
    }

    #[test]
    fn helpers() {
        assert!(check_http_method("PATCH").is_ok());
        assert!(check_http_method("LINK").is_err());
        assert_eq!(get_http_request_version("HTTP/1.0"), Ok(0));
        assert_eq!(get_http_resp_info("HTTP/1.1 301 Moved"), Ok((1, 301)));
        assert!(is_http_req_line("DELETE /x HTTP/1.1"));
        assert!(!is_http_req_line("DELETE /x HTTP/3"));
    }

    #[test]
    fn head_response_ends_with_headers() {
        let mut parser = HttpLog::default();
        let L7Message::Request(req) = parser
            .parse_payload(b"HEAD /big.iso HTTP/1.1\r\nHost: mirror\r\n\r\n", &param(false))
            .unwrap()
        else {
            panic!("not a request");
        };
        assert_eq!(req.method, "HEAD");

        let resp = b"HTTP/1.1 200 OK\r\nContent-Length: 1048576\r\n\r\n";
        let L7Message::Response(resp) = parser.parse_payload(resp, &param(false)).unwrap() else {
            panic!("not a response");
        };
        assert_eq!(resp.status_code, 200);
        assert_eq!(resp.content_length, Some(1048576));

        // the same headers after a GET still wait for the body
        parser
            .parse_payload(b"GET /big.iso HTTP/1.1\r\n\r\n", &param(false))
            .unwrap();
        assert_eq!(
            parser.parse_payload(
                b"HTTP/1.1 200 OK\r\nContent-Length: 1048576\r\n\r\n",
                &param(false)
            ),
            Err(Error::NeedMoreData)
        );
    }

    #[test]
    fn bodiless_status_codes() {
        let mut parser = HttpLog::default();
        for payload in [
            &b"HTTP/1.1 304 Not Modified\r\nContent-Length: 20\r\n\r\n"[..],
            &b"HTTP/1.1 204 No Content\r\nContent-Length: 20\r\n\r\n"[..],
            &b"HTTP/1.1 100 Continue\r\n\r\n"[..],
        ] {
            assert!(matches!(
                parser.parse_payload(payload, &param(false)),
                Ok(L7Message::Response(_))
            ));
        }
        assert_eq!(
            parser.parse_payload(
                b"HTTP/1.1 200 OK\r\nContent-Length: 20\r\n\r\n",
                &param(false)
            ),
            Err(Error::NeedMoreData)
        );
    }

    #[test]
    fn interim_response_keeps_pending_head() {
        let mut parser = HttpLog::default();
        parser
            .parse_payload(b"HEAD / HTTP/1.1\r\nExpect: 100-continue\r\n\r\n", &param(false))
            .unwrap();
        parser
            .parse_payload(b"HTTP/1.1 100 Continue\r\n\r\n", &param(false))
            .unwrap();
        assert!(matches!(
            parser.parse_payload(
                b"HTTP/1.1 200 OK\r\nContent-Length: 512\r\n\r\n",
                &param(false)
            ),
            Ok(L7Message::Response(_))
        ));
        assert!(parser.pending_methods.is_empty());
    }
}
