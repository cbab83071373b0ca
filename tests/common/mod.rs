//! Fixtures shared by the integration tests: synthetic images and a
//! loopback HTTP server that serves them.

#![allow(dead_code)]

use image::{ImageEncoder, RgbImage, RgbaImage};
use image_splitter::config::AppConfig;
use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::Path;

/// Pixel of the gradient fixtures at `(x, y)`. Same shape as the in-crate
/// `test_helpers` fixtures.
pub fn gradient_pixel(x: u32, y: u32) -> [u8; 4] {
    [(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8, 255]
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbaImage::from_fn(width, height, |x, y| image::Rgba(gradient_pixel(x, y)));
    let mut out = Vec::new();
    image::codecs::png::PngEncoder::new(&mut out)
        .write_image(img.as_raw(), width, height, image::ExtendedColorType::Rgba8)
        .unwrap();
    out
}

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

/// Dimensions of an image file, format guessed from content.
pub fn dimensions(path: &Path) -> (u32, u32) {
    image::ImageReader::open(path)
        .unwrap()
        .with_guessed_format()
        .unwrap()
        .into_dimensions()
        .unwrap()
}

/// Config pointing at `root` and `url_host`, otherwise stock defaults.
pub fn app_config(root: &Path, url_host: &str) -> AppConfig {
    let mut config = AppConfig::default();
    config.storage.root = root.to_path_buf();
    config.storage.url_host = url_host.to_string();
    config
}

/// Serves fixed bodies by path on a loopback port; unknown paths get a 404.
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

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base(), path.trim_start_matches('/'))
    }

    /// Base URL with a trailing slash, usable as `storage.url_host`.
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
