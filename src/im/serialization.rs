use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// 解压 gzip 数据
pub fn decompress_gzip(data: &[u8]) -> Result<Vec<u8>, std::io::Error> {
    let mut decoder = GzDecoder::new(data);
    let mut decompressed = Vec::new();
    decoder.read_to_end(&mut decompressed)?;
    Ok(decompressed)
}

/// 压缩数据为 gzip 格式
pub fn compress_gzip(data: &[u8]) -> Result<Vec<u8>, std::io::Error> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

/// 生成实体 ID，形如 `msg_5f0c...`
pub fn generate_id(prefix: &str) -> String {
    format!("{}_{}", prefix, uuid::Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gzip_restores_payload() {
        let payload = br#"{"topic":"notifications","items":[]}"#;
        let packed = compress_gzip(payload).unwrap();
        assert_eq!(decompress_gzip(&packed).unwrap(), payload.to_vec());
    }

    #[test]
    fn ids_carry_prefix_and_are_unique() {
        let a = generate_id("msg");
        let b = generate_id("msg");
        assert!(a.starts_with("msg_"));
        assert_ne!(a, b);
    }
}
