use crate::downloader::error::ProbeError;
use crate::downloader::task::{ByteRange, RequestHeaders, ResourceDescriptor};
use crate::downloader::transport::RangeTransport;
use tracing::{debug, info};

/// 解析后的 Content-Range 头
///
/// 支持 `bytes <start>-<end>/<total>`、`bytes */<total>` 以及总长度未知的 `/*`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    /// 返回的字节范围（`*` 时为 None）
    pub range: Option<(u64, u64)>,
    /// 资源总长度（`*` 时为 None）
    pub total: Option<u64>,
}

impl ContentRange {
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        let unit_len = "bytes".len();
        if !value.get(..unit_len)?.eq_ignore_ascii_case("bytes") {
            return None;
        }
        let rest = value.get(unit_len..)?.trim_start();
        let (range_part, total_part) = rest.split_once('/')?;

        let range = match range_part.trim() {
            "*" => None,
            bounds => {
                let (start, end) = bounds.split_once('-')?;
                let start = start.trim().parse::<u64>().ok()?;
                let end = end.trim().parse::<u64>().ok()?;
                if end < start {
                    return None;
                }
                Some((start, end))
            }
        };

        let total = match total_part.trim() {
            "*" => None,
            total => Some(total.parse::<u64>().ok()?),
        };

        Some(Self { range, total })
    }
}

/// 发送 `Range: bytes=0-0` 探测请求，获取资源总长度并确认服务器支持 Range
///
/// 任何失败都直接返回，调用方在此之前不能创建任何文件
pub async fn probe_resource(
    transport: &dyn RangeTransport,
    url: &str,
    headers: &RequestHeaders,
) -> Result<ResourceDescriptor, ProbeError> {
    info!("🔍 探测资源: {} (Range: bytes=0-0)", url);

    let response = transport
        .get_range(url, headers, ByteRange::new(0, 0))
        .await?;

    debug!("📡 探测响应状态: {}", response.status);

    if response.status != 206 {
        return Err(ProbeError::InvalidResponseStatus(response.status));
    }

    let raw = response
        .content_range
        .ok_or(ProbeError::MissingContentRange)?;

    let total_length = ContentRange::parse(&raw)
        .and_then(|range| range.total)
        .ok_or_else(|| ProbeError::MalformedContentRange(raw.clone()))?;

    info!("✅ 服务器支持 Range 请求, Content-Range: {}, 总大小: {} bytes", raw, total_length);

    Ok(ResourceDescriptor {
        total_length,
        range_supported: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::testing::{MockTransport, EICAR};
    use proptest::prelude::*;

    #[test]
    fn test_parse_content_range_forms() {
        assert_eq!(
            ContentRange::parse("bytes 0-0/69"),
            Some(ContentRange {
                range: Some((0, 0)),
                total: Some(69)
            })
        );
        assert_eq!(
            ContentRange::parse("bytes */1234"),
            Some(ContentRange {
                range: None,
                total: Some(1234)
            })
        );
        assert_eq!(
            ContentRange::parse("Bytes 10-19/*"),
            Some(ContentRange {
                range: Some((10, 19)),
                total: None
            })
        );
    }

    #[test]
    fn test_parse_content_range_rejects_garbage() {
        assert_eq!(ContentRange::parse(""), None);
        assert_eq!(ContentRange::parse("bytes"), None);
        assert_eq!(ContentRange::parse("items 0-1/2"), None);
        assert_eq!(ContentRange::parse("bytes 0-0"), None);
        assert_eq!(ContentRange::parse("bytes 0-0/-5"), None);
        assert_eq!(ContentRange::parse("bytes 0-0/abc"), None);
        assert_eq!(ContentRange::parse("bytes 9-3/10"), None);
    }

    proptest! {
        #[test]
        fn prop_parse_recovers_total(start in 0u64..1_000_000, len in 1u64..1_000_000, extra in 0u64..1_000) {
            let end = start + len - 1;
            let total = end + 1 + extra;
            let header = format!("bytes {}-{}/{}", start, end, total);
            let parsed = ContentRange::parse(&header).unwrap();
            prop_assert_eq!(parsed.range, Some((start, end)));
            prop_assert_eq!(parsed.total, Some(total));
        }
    }

    #[tokio::test]
    async fn test_probe_success() {
        let transport = MockTransport::new(EICAR.as_bytes());
        let descriptor = probe_resource(&transport, "mock://eicar", &RequestHeaders::new())
            .await
            .unwrap();
        assert_eq!(descriptor.total_length, 69);
        assert!(descriptor.range_supported);
    }

    #[tokio::test]
    async fn test_probe_invalid_status() {
        let transport = MockTransport::new(EICAR.as_bytes()).with_probe_status(404);
        let err = probe_resource(&transport, "mock://eicar", &RequestHeaders::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::InvalidResponseStatus(404)));

        // 不支持 Range 的服务器返回 200
        let transport = MockTransport::new(EICAR.as_bytes()).with_probe_status(200);
        let err = probe_resource(&transport, "mock://eicar", &RequestHeaders::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::InvalidResponseStatus(200)));
    }

    #[tokio::test]
    async fn test_probe_missing_and_malformed_content_range() {
        let transport = MockTransport::new(EICAR.as_bytes()).with_probe_content_range(None);
        let err = probe_resource(&transport, "mock://eicar", &RequestHeaders::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::MissingContentRange));

        let transport = MockTransport::new(EICAR.as_bytes())
            .with_probe_content_range(Some("bytes 0-0/lots".to_string()));
        let err = probe_resource(&transport, "mock://eicar", &RequestHeaders::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::MalformedContentRange(ref raw) if raw == "bytes 0-0/lots"));
    }
}
