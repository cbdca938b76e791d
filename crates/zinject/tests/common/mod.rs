//! Fixture builders shared by the integration tests.

#![allow(dead_code)]

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const LC_LOAD_DYLIB: u32 = 0xc;
pub const LC_LOAD_WEAK_DYLIB: u32 = 0x8000_0018;

const LC_SEGMENT_64: u32 = 0x19;
const LC_ID_DYLIB: u32 = 0xd;
const TEXT_OFFSET: usize = 0x1000;
const TEXT_SIZE: usize = 0x40;

/// 64-bit little-endian Mach-O with a `__TEXT` segment at 0x1000 and the
/// given dependencies. `id` makes it an `MH_DYLIB`.
pub fn macho(id: Option<&str>, dependencies: &[&str]) -> Vec<u8> {
    let mut commands = Vec::new();
    if let Some(id) = id {
        commands.push(dylib_command(LC_ID_DYLIB, id));
    }
    for dep in dependencies {
        commands.push(dylib_command(LC_LOAD_DYLIB, dep));
    }

    let total = TEXT_OFFSET + TEXT_SIZE;
    let segment = text_segment(total);
    let sizeofcmds = segment.len() + commands.iter().map(Vec::len).sum::<usize>();
    let filetype = if id.is_some() { 0x6 } else { 0x2 };

    let mut out = Vec::with_capacity(total);
    for v in [
        0xfeed_facfu32,
        0x0100_000c,
        0,
        filetype,
        1 + commands.len() as u32,
        sizeofcmds as u32,
        0x0020_0085,
        0,
    ] {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out.extend_from_slice(&segment);
    for c in commands {
        out.extend_from_slice(&c);
    }
    out.resize(TEXT_OFFSET, 0);
    while out.len() < total {
        out.extend_from_slice(&[0xc0, 0x03, 0x5f, 0xd6]);
    }
    out
}

fn dylib_command(cmd: u32, path: &str) -> Vec<u8> {
    let size = (24 + path.len() + 1).div_ceil(8) * 8;
    let mut out = Vec::with_capacity(size);
    for v in [cmd, size as u32, 24, 2, 0x10000, 0x10000] {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out.extend_from_slice(path.as_bytes());
    out.resize(size, 0);
    out
}

fn text_segment(total: usize) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&LC_SEGMENT_64.to_le_bytes());
    out.extend_from_slice(&(72u32 + 80).to_le_bytes());
    out.extend_from_slice(&name16("__TEXT"));
    for v in [0x1_0000_0000u64, 0x4000, 0, total as u64] {
        out.extend_from_slice(&v.to_le_bytes());
    }
    for v in [5u32, 5, 1, 0] {
        out.extend_from_slice(&v.to_le_bytes());
    }

    out.extend_from_slice(&name16("__text"));
    out.extend_from_slice(&name16("__TEXT"));
    out.extend_from_slice(&(0x1_0000_0000u64 + TEXT_OFFSET as u64).to_le_bytes());
    out.extend_from_slice(&(TEXT_SIZE as u64).to_le_bytes());
    for v in [TEXT_OFFSET as u32, 2, 0, 0, 0x8000_0400, 0, 0, 0] {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

fn name16(name: &str) -> [u8; 16] {
    let mut out = [0u8; 16];
    out[..name.len()].copy_from_slice(name.as_bytes());
    out
}

/// Load command types of every dylib dependency, read with goblin.
pub fn dependency_commands(binary: &Path) -> Vec<(u32, String)> {
    let data = fs::read(binary).unwrap();
    let macho = goblin::mach::MachO::parse(&data, 0).unwrap();
    let mut out = Vec::new();
    for lc in &macho.load_commands {
        match &lc.command {
            goblin::mach::load_command::CommandVariant::LoadDylib(d)
            | goblin::mach::load_command::CommandVariant::LoadWeakDylib(d) => {
                let start = lc.offset + d.dylib.name as usize;
                let end = lc.offset + d.cmdsize as usize;
                let raw = &data[start..end];
                let len = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
                out.push((d.cmd, String::from_utf8_lossy(&raw[..len]).into_owned()));
            }
            _ => {}
        }
    }
    out
}

pub fn build_tar(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o755);
        header.set_cksum();
        builder.append_data(&mut header, path, *content).unwrap();
    }
    builder.into_inner().unwrap()
}

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

pub fn xz(data: &[u8]) -> Vec<u8> {
    let mut enc = xz2::write::XzEncoder::new(Vec::new(), 6);
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

pub fn build_ar(members: &[(&str, &[u8])]) -> Vec<u8> {
    let mut out = b"!<arch>\n".to_vec();
    for (name, content) in members {
        let header = format!(
            "{:<16}{:<12}{:<6}{:<6}{:<8}{:<10}`\n",
            format!("{}/", name),
            0,
            0,
            0,
            "100644",
            content.len()
        );
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(content);
        if content.len() % 2 == 1 {
            out.push(b'\n');
        }
    }
    out
}

/// Writes a `.deb` with an xz'd tar payload of `files`.
pub fn write_deb(path: &Path, files: &[(&str, &[u8])]) -> PathBuf {
    let control = gzip(&build_tar(&[("control", b"Package: test\n")]));
    let data = xz(&build_tar(files));
    let deb = build_ar(&[
        ("debian-binary", b"2.0\n"),
        ("control.tar.gz", &control),
        ("data.tar.xz", &data),
    ]);
    fs::write(path, deb).unwrap();
    path.to_path_buf()
}

/// Baseline package shipping `CydiaSubstrate.framework` rootless.
pub fn write_baseline(dir: &Path) -> PathBuf {
    let substrate = macho(
        Some("@rpath/CydiaSubstrate.framework/CydiaSubstrate"),
        &["/usr/lib/libSystem.B.dylib"],
    );
    write_deb(
        &dir.join("ellekit.deb"),
        &[(
            "var/jb/Library/Frameworks/CydiaSubstrate.framework/CydiaSubstrate",
            &substrate,
        )],
    )
}

/// Unpacked `Runner.app` whose executable depends on libSystem only.
pub fn make_app(dir: &Path) -> PathBuf {
    let app = dir.join("Runner.app");
    fs::create_dir_all(&app).unwrap();
    fs::write(
        app.join("Info.plist"),
        r#"<?xml version="1.0" encoding="UTF-8"?>
<plist version="1.0">
<dict>
    <key>CFBundleIdentifier</key>
    <string>com.example.runner</string>
    <key>CFBundleExecutable</key>
    <string>Runner</string>
</dict>
</plist>"#,
    )
    .unwrap();
    fs::write(app.join("Runner"), macho(None, &["/usr/lib/libSystem.B.dylib"])).unwrap();
    app
}
