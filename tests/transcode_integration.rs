//! File-backed tests for sniffing, framing and transcoding

use bzip2::write::BzEncoder;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use fastx_upload::io::{DataSource, TranscodeOptions, Transcoder};
use fastx_upload::{FileFormat, UploadError};
use std::io::{Read, Write};
use std::path::PathBuf;
use tempfile::TempDir;

fn fastq(prefix: &str, n: usize) -> Vec<u8> {
    let mut out = Vec::new();
    for i in 0..n {
        out.extend_from_slice(
            format!("@{}{}\nACGTACGTACGTACGT\n+\nIIIIIIIIIIIIIIII\n", prefix, i).as_bytes(),
        );
    }
    out
}

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

fn gunzip(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    MultiGzDecoder::new(data).read_to_end(&mut out).unwrap();
    out
}

fn write(dir: &TempDir, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, data).unwrap();
    path
}

fn transcode(
    reads: &PathBuf,
    mates: Option<&PathBuf>,
    options: &TranscodeOptions,
) -> fastx_upload::Result<Vec<u8>> {
    let mates = mates.map(DataSource::from_path);
    let mut session = Transcoder::open(&DataSource::from_path(reads), mates.as_ref(), options)?;
    let mut out = Vec::new();
    session.read_to_end(&mut out).map_err(UploadError::from_io)?;
    Ok(out)
}

fn plain() -> TranscodeOptions {
    TranscodeOptions {
        recompress: false,
        ..TranscodeOptions::default()
    }
}

#[test]
fn test_gzip_in_gzip_out() {
    let dir = TempDir::new().unwrap();
    let data = fastq("r", 50);
    let path = write(&dir, "reads.fastq.gz", &gzip(&data));

    let out = transcode(&path, None, &TranscodeOptions::default()).unwrap();
    assert_eq!(&out[..2], &[0x1f, 0x8b]);
    assert_eq!(gunzip(&out), data);
}

#[test]
fn test_bzip2_input() {
    let dir = TempDir::new().unwrap();
    let data = fastq("r", 20);
    let mut encoder = BzEncoder::new(Vec::new(), bzip2::Compression::default());
    encoder.write_all(&data).unwrap();
    let path = write(&dir, "reads.fq.bz2", &encoder.finish().unwrap());

    assert_eq!(transcode(&path, None, &plain()).unwrap(), data);
}

#[test]
fn test_multi_member_gzip() {
    let dir = TempDir::new().unwrap();
    let first = fastq("a", 10);
    let second = fastq("b", 10);
    let mut joined = gzip(&first);
    joined.extend_from_slice(&gzip(&second));
    let path = write(&dir, "reads.fq.gz", &joined);

    let out = transcode(&path, None, &plain()).unwrap();
    assert_eq!(out, [first, second].concat());
}

#[test]
fn test_paired_interleaves() {
    let dir = TempDir::new().unwrap();
    let r1 = write(&dir, "s_R1.fq", &fastq("fwd", 5));
    let r2 = write(&dir, "s_R2.fq", &fastq("rev", 5));

    let mates = DataSource::from_path(&r2);
    let mut session =
        Transcoder::open(&DataSource::from_path(&r1), Some(&mates), &plain()).unwrap();
    assert!(session.is_paired());
    assert_eq!(session.format(), FileFormat::Fastq);

    let mut out = String::new();
    session.read_to_string(&mut out).unwrap();
    let headers: Vec<&str> = out.lines().filter(|l| l.starts_with('@')).collect();
    assert_eq!(headers[..4], ["@fwd0", "@rev0", "@fwd1", "@rev1"]);
    assert_eq!(session.records_read(), 10);
}

#[test]
fn test_paired_length_mismatch() {
    let dir = TempDir::new().unwrap();
    let r1 = write(&dir, "s_R1.fq", &fastq("fwd", 5));
    let r2 = write(&dir, "s_R2.fq", &fastq("rev", 4));

    match transcode(&r1, Some(&r2), &plain()) {
        Err(UploadError::Validation(msg)) => assert!(msg.contains("not the same length")),
        other => panic!("Expected Validation error, got {:?}", other.map(|v| v.len())),
    }
}

#[test]
fn test_paired_format_mismatch() {
    let dir = TempDir::new().unwrap();
    let r1 = write(&dir, "s_R1.fq", &fastq("fwd", 5));
    let fasta = format!(">c1\n{}\n", "ACGT".repeat(30));
    let r2 = write(&dir, "s_R2.fa", fasta.as_bytes());

    let err = transcode(&r1, Some(&r2), &plain()).unwrap_err();
    assert!(err.is_validation());
}

#[test]
fn test_filename_must_match_content() {
    let dir = TempDir::new().unwrap();
    let data = fastq("r", 5);

    let mislabeled = write(&dir, "reads.fa", &data);
    match transcode(&mislabeled, None, &plain()) {
        Err(UploadError::Validation(msg)) => assert!(msg.contains("lacks a \".fq\" ending")),
        other => panic!("Expected Validation error, got {:?}", other.map(|v| v.len())),
    }

    let hidden_gzip = write(&dir, "reads.fq", &gzip(&data));
    match transcode(&hidden_gzip, None, &plain()) {
        Err(UploadError::Validation(msg)) => assert!(msg.contains("gzipped")),
        other => panic!("Expected Validation error, got {:?}", other.map(|v| v.len())),
    }

    let mut unchecked = plain();
    unchecked.framer.check_filename = false;
    assert_eq!(transcode(&mislabeled, None, &unchecked).unwrap(), data);
}

#[test]
fn test_too_small() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "tiny.fa", b">a\nACGT\n");
    match transcode(&path, None, &plain()) {
        Err(UploadError::Validation(msg)) => assert!(msg.contains("too small")),
        other => panic!("Expected Validation error, got {:?}", other.map(|v| v.len())),
    }
}

#[test]
fn test_crlf_stripped_from_wrapped_fasta() {
    let dir = TempDir::new().unwrap();
    let line = "ACGTACGTAC";
    let data = format!(">chr1 desc\r\n{l}\r\n{l}\r\n{l}\r\n>chr2\r\n{l}\r\n", l = line);
    let path = write(&dir, "genome.fasta", data.as_bytes());

    let out = String::from_utf8(transcode(&path, None, &plain()).unwrap()).unwrap();
    assert_eq!(
        out,
        format!(">chr1 desc\n{l}\n{l}\n{l}\n>chr2\n{l}\n", l = line)
    );
}

#[test]
fn test_rna_translated_with_warning() {
    let dir = TempDir::new().unwrap();
    let data = format!(">rna\n{}\n", "ACGU".repeat(25));
    let path = write(&dir, "rna.fa", data.as_bytes());

    let mut session = Transcoder::open(&DataSource::from_path(&path), None, &plain()).unwrap();
    let mut out = String::new();
    session.read_to_string(&mut out).unwrap();

    assert!(!out.contains('U'));
    assert_eq!(session.warnings().len(), 1);
    assert!(session.warnings()[0].message.contains("U->T"));
}

#[test]
fn test_invalid_base_fails_mid_stream() {
    let dir = TempDir::new().unwrap();
    let mut data = fastq("ok", 200);
    data.extend_from_slice(b"@bad\nAC!T\n+\nIIII\n");
    let path = write(&dir, "reads.fq", &data);

    let err = transcode(&path, None, &plain()).unwrap_err();
    match err {
        UploadError::Validation(msg) => assert!(msg.contains("non-nucleic acid")),
        other => panic!("Expected Validation error, got {:?}", other),
    }
}
