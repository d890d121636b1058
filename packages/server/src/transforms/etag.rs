use imaging::TransformSpec;

/// Deterministic tag of one rendition:
/// `<checksum>-<w>x<h>-<format>-<q>-<rotate>-<flip>-<kernel>`.
///
/// An empty format segment means the source container is kept.
pub fn transform_etag(checksum: &str, spec: &TransformSpec) -> String {
    format!(
        "{checksum}-{}x{}-{}-{}-{}-{}-{}",
        spec.width,
        spec.height,
        spec.format.map(|f| f.as_str()).unwrap_or(""),
        spec.quality,
        spec.rotate.degrees(),
        spec.flip.map(|f| f.as_str()).unwrap_or(""),
        spec.kernel.as_str(),
    )
}
