//! Shared test utilities for the image-splitter test suite.
//!
//! Provides synthetic image fixtures and a minimal HTTP server so fetch and
//! full-pipeline tests run without network access.
//!
//! # Usage
//!
//! ```ignore
//! use crate::test_helpers::*;
//!
//! let server = TestServer::start(vec![("/tall.png", png_bytes(40, 300))]);
//! let url = server.url("tall.png");
//! ```

use image::{ImageEncoder, RgbImage, RgbaImage};
use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::Path;

// =========================================================================
// Image fixtures
// =========================================================================

/// Pixel of the gradient fixtures at `(x, y)`. Deterministic so cropped
/// regions can be compared pixel by pixel.
pub fn gradient_pixel(x: u32, y: u32) -> [u8; 4] {
    [(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8, 255]
}

/// Encode a gradient PNG in memory.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbaImage::from_fn(width, height, |x, y| image::Rgba(gradient_pixel(x, y)));
    let mut out = Vec::new();
    image::codecs::png::PngEncoder::new(&mut out)
        .write_image(img.as_raw(), width, height, image::ExtendedColorType::Rgba8)
        .unwrap();
    out
}

/// Encode a gradient JPEG in memory.
pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    });
    let mut out = Vec::new();
    image::codecs::jpeg::JpegEncoder::new(&mut out)
        .write_image(img.as_raw(), width, height, image::ExtendedColorType::Rgb8)
        .unwrap();
    out
}

/// Write a small valid PNG file with the given dimensions.
pub fn create_test_png(path: &Path, width: u32, height: u32) {
    std::fs::write(path, png_bytes(width, height)).unwrap();
}

/// Write a small valid JPEG file with the given dimensions.
pub fn create_test_jpeg(path: &Path, width: u32, height: u32) {
    std::fs::write(path, jpeg_bytes(width, height)).unwrap();
}

// =========================================================================
// HTTP fixture
// =========================================================================

/// Serves fixed bodies by path on a loopback port; unknown paths get a 404.
///
/// The accept loop runs on a detached thread for the rest of the test binary.
pub struct TestServer {
    addr: SocketAddr,
}

impl TestServer {
    pub fn start(routes: Vec<(&'static str, Vec<u8>)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                respond(stream, &routes);
            }
        });
        Self { addr }
    }

    /// Absolute URL for a path relative to the server root.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base(), path.trim_start_matches('/'))
    }

    /// Base URL with a trailing slash, as a configured `url_host` would be.
    pub fn base(&self) -> String {
        format!("http://{}/", self.addr)
    }
}

fn respond(stream: TcpStream, routes: &[(&'static str, Vec<u8>)]) {
    let mut reader = BufReader::new(stream);
    let mut request_line = String::new();
    if reader.read_line(&mut request_line).is_err() {
        return;
    }
    // Drain headers; requests carry no body.
    loop {
        let mut line = String::new();
        match reader.read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) if line == "\r\n" || line == "\n" => break,
            Ok(_) => {}
        }
    }

    let path = request_line.split_whitespace().nth(1).unwrap_or("/");
    let (status, body): (&str, &[u8]) = match routes.iter().find(|(p, _)| *p == path) {
        Some((_, body)) => ("200 OK", body.as_slice()),
        None => ("404 Not Found", &b"not found"[..]),
    };

    let mut stream = reader.into_inner();
    let header = format!(
        "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    let _ = stream.write_all(header.as_bytes());
    let _ = stream.write_all(body);
    let _ = stream.flush();
}
