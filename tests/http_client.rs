//! HTTP client session over in-memory connections.

mod harness;

use harness::{Log, config, dispatcher, memory_connection, written};
use wharf::net::StreamHandler;
use wharf::{HeaderMap, HttpClient, HttpContext, HttpHandler, Response};

#[derive(Default)]
struct Collect {
    responses: Log<Response>,
    connects: Log<()>,
}

impl HttpHandler for Collect {
    fn on_connect(&mut self, ctx: &HttpContext) -> wharf::Result<()> {
        self.connects.push(());
        let mut headers = HeaderMap::new();
        headers.append("Host", "example.com");
        ctx.send_request("GET", "/index.html", &headers, None)
    }

    fn on_response(&mut self, _ctx: &HttpContext, response: Response) -> wharf::Result<()> {
        self.responses.push(response);
        Ok(())
    }
}

fn feed_in_chunks(client: &dyn StreamHandler, wire: &[u8], chunk: usize) {
    for piece in wire.chunks(chunk) {
        client.on_read_avail(piece);
    }
}

#[test]
fn test_connect_job_sends_request() {
    let (socket, conn) = memory_connection();
    let jobs = dispatcher();
    let handler = Collect::default();
    let connects = handler.connects.clone();
    let client = HttpClient::new(conn.clone(), &config(), jobs.sender(), handler);

    client.on_connect();
    jobs.wait_idle();

    assert_eq!(connects.len(), 1);
    assert_eq!(
        written(&conn, &socket),
        b"GET /index.html HTTP/1.1\r\nHost: example.com\r\n\r\n"
    );
    assert!(conn.deadline().is_some());
}

#[test]
fn test_content_length_response_under_any_chunking() {
    let wire = b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 11\r\n\r\nhello world";
    for chunk in [1, 2, 5, wire.len()] {
        let (_, conn) = memory_connection();
        let jobs = dispatcher();
        let handler = Collect::default();
        let responses = handler.responses.clone();
        let client = HttpClient::new(conn.clone(), &config(), jobs.sender(), handler);

        feed_in_chunks(&*client, wire, chunk);
        jobs.wait_idle();

        let responses = responses.items();
        assert_eq!(responses.len(), 1, "chunk size {chunk}");
        assert_eq!(responses[0].status(), 200);
        assert_eq!(responses[0].headers.headers.get("content-type"), Some("text/plain"));
        assert_eq!(&responses[0].entity[..], b"hello world");
        assert_eq!(responses[0].transfer_encoding, "");
    }
}

#[test]
fn test_chunked_response_merges_trailers_preserving_duplicates() {
    let wire = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\nSet-Cookie: a=1\r\n\r\n\
        5\r\nhello\r\n6\r\n world\r\n0\r\nSet-Cookie: b=2\r\nX-Trailer: yes\r\n\r\n";
    for chunk in [1, 4, wire.len()] {
        let (_, conn) = memory_connection();
        let jobs = dispatcher();
        let handler = Collect::default();
        let responses = handler.responses.clone();
        let client = HttpClient::new(conn.clone(), &config(), jobs.sender(), handler);

        feed_in_chunks(&*client, wire, chunk);
        jobs.wait_idle();

        let responses = responses.items();
        assert_eq!(responses.len(), 1);
        let response = &responses[0];
        assert_eq!(&response.entity[..], b"hello world");
        assert_eq!(response.transfer_encoding, "chunked");
        let cookies: Vec<_> = response.headers.headers.get_all("set-cookie").collect();
        assert_eq!(cookies, vec!["a=1", "b=2"]);
        assert_eq!(response.headers.headers.get("x-trailer"), Some("yes"));
    }
}

#[test]
fn test_pipelined_responses_each_get_one_job() {
    let wire = b"HTTP/1.1 204 No Content\r\n\r\n\
        HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\none\
        HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n";
    let (_, conn) = memory_connection();
    let jobs = dispatcher();
    let handler = Collect::default();
    let responses = handler.responses.clone();
    let client = HttpClient::new(conn.clone(), &config(), jobs.sender(), handler);

    client.on_read_avail(wire);
    jobs.wait_idle();

    let statuses: Vec<_> = responses.items().iter().map(Response::status).collect();
    assert_eq!(statuses, vec![204, 200, 404]);
    assert!(!conn.is_shutdown_requested());
}

#[test]
fn test_response_until_eof() {
    let (_, conn) = memory_connection();
    let jobs = dispatcher();
    let handler = Collect::default();
    let responses = handler.responses.clone();
    let client = HttpClient::new(conn.clone(), &config(), jobs.sender(), handler);

    client.on_read_avail(b"HTTP/1.0 200 OK\r\n\r\nall of ");
    client.on_read_avail(b"it");
    client.on_read_hup();
    jobs.wait_idle();

    let responses = responses.items();
    assert_eq!(responses.len(), 1);
    assert_eq!(&responses[0].entity[..], b"all of it");
    assert!(conn.is_closed());
}

#[test]
fn test_oversized_response_forces_shutdown() {
    let mut config = config();
    config.limits.max_response_size = 8;
    let (_, conn) = memory_connection();
    let jobs = dispatcher();
    let handler = Collect::default();
    let responses = handler.responses.clone();
    let client = HttpClient::new(conn.clone(), &config, jobs.sender(), handler);

    client.on_read_avail(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n");
    client.on_read_avail(b"5\r\n12345\r\n5\r\n67890\r\n0\r\n\r\n");
    jobs.wait_idle();

    assert_eq!(responses.len(), 0);
    assert!(conn.is_closed());
}

#[test]
fn test_malformed_response_forces_shutdown() {
    let (_, conn) = memory_connection();
    let jobs = dispatcher();
    let handler = Collect::default();
    let responses = handler.responses.clone();
    let client = HttpClient::new(conn.clone(), &config(), jobs.sender(), handler);

    client.on_read_avail(b"garbage\r\n\r\n");
    jobs.wait_idle();

    assert_eq!(responses.len(), 0);
    assert!(conn.is_closed());
}

#[test]
fn test_post_with_entity() {
    let (socket, conn) = memory_connection();
    let jobs = dispatcher();
    let client = HttpClient::new(conn.clone(), &config(), jobs.sender(), Collect::default());

    client
        .send_request("POST", "/api", &HeaderMap::new(), Some(b"{}"))
        .unwrap();

    assert_eq!(
        written(&conn, &socket),
        b"POST /api HTTP/1.1\r\nContent-Length: 2\r\n\r\n{}"
    );
}
