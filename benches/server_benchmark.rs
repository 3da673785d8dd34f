use criterion::{black_box, criterion_group, criterion_main, Criterion};
use quickserve::http::{HttpParser, Method, Request, Response};
use quickserve::{Pages, Routes};
use std::net::SocketAddr;

fn peer() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 50000))
}

fn benchmark_http_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("http_parser");

    let simple_request = "GET / HTTP/1.1\r\nHost: localhost\r\n\r\n";

    group.bench_function("parse_simple_request", |b| {
        b.iter(|| {
            let mut parser = HttpParser::new();
            parser.parse(black_box(simple_request.as_bytes())).unwrap();
            assert!(parser.is_complete());
            let request = parser.get_request(peer()).unwrap();
            assert_eq!(request.method, Method::Get);
            assert_eq!(request.path, "/");
        })
    });

    let complex_request = "POST /api/items?sort=name&page=2 HTTP/1.1\r\n\
                          Host: example.com\r\n\
                          Content-Type: application/json; charset=utf-8\r\n\
                          Content-Length: 27\r\n\
                          User-Agent: Benchmark\r\n\
                          Accept: */*\r\n\
                          \r\n\
                          {\"name\":\"test\",\"value\":123}";

    group.bench_function("parse_complex_request", |b| {
        b.iter(|| {
            let mut parser = HttpParser::new();
            parser.parse(black_box(complex_request.as_bytes())).unwrap();
            assert!(parser.is_complete());
            let request = parser.get_request(peer()).unwrap();
            assert_eq!(request.method, Method::Post);
            assert_eq!(request.path, "/api/items");
            assert_eq!(request.query.get("page"), Some("2"));
            assert_eq!(request.body.len(), 27);
        })
    });

    group.finish();
}

fn benchmark_response_serialization(c: &mut Criterion) {
    let mut group = c.benchmark_group("response");

    group.bench_function("simple_response", |b| {
        b.iter(|| {
            let response = Response::new().with_body("Hello, World!");
            let encoded = response.serialize().unwrap();
            assert!(!encoded.is_empty());
        })
    });

    group.bench_function("complex_response", |b| {
        b.iter(|| {
            let response = Response::new()
                .with_content_type("application/json")
                .with_header("Cache-Control", "no-cache")
                .with_header("X-Custom-Header", "Benchmark")
                .with_body("{\"status\":\"success\",\"data\":{\"items\":[1,2,3,4,5]}}");
            let encoded = response.serialize().unwrap();
            assert!(!encoded.is_empty());
        })
    });

    group.bench_function("error_page", |b| {
        let pages = Pages::new("templates/default_error.html");
        b.iter(|| {
            let encoded = pages.error(black_box(quickserve::Status::NotFound)).serialize().unwrap();
            assert!(!encoded.is_empty());
        })
    });

    group.finish();
}

fn benchmark_route_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("routes");

    let mut routes = Routes::new();
    for i in 0..50 {
        routes.insert(&format!("/api/resource/{}", i), |_: &Request| Ok(Response::new()));
    }
    let hit = Request::new(Method::Get, "/api/resource/49").unwrap();
    let miss = Request::new(Method::Get, "/api/resource/unknown").unwrap();

    group.bench_function("dispatch_hit", |b| {
        b.iter(|| assert!(routes.dispatch(black_box(&hit)).is_some()))
    });

    group.bench_function("dispatch_miss", |b| {
        b.iter(|| assert!(routes.dispatch(black_box(&miss)).is_none()))
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_http_parsing,
    benchmark_response_serialization,
    benchmark_route_lookup
);
criterion_main!(benches);
