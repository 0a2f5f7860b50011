//! Deep Zoom Image (DZI) descriptor documents.
//!
//! Slide servers commonly publish descriptors as Deep Zoom XML rather than
//! JSON:
//!
//! ```xml
//! <?xml version="1.0" encoding="UTF-8"?>
//! <Image xmlns="http://schemas.microsoft.com/deepzoom/2008"
//!        Format="jpeg"
//!        Overlap="1"
//!        TileSize="256">
//!   <Size Width="46000" Height="32914"/>
//! </Image>
//! ```
//!
//! Deep Zoom does not carry level bounds. They follow from the convention
//! that level 0 is a 1x1 image and the top level is full resolution:
//! `max_level = ceil(log2(max(width, height)))`.

use crate::error::DescriptorError;

use super::descriptor::{PyramidDescriptor, RawDescriptor};

/// Deep Zoom XML namespace.
pub const DZI_NAMESPACE: &str = "http://schemas.microsoft.com/deepzoom/2008";

/// Top DZI level for an image of the given dimensions.
pub fn dzi_max_level(width: u32, height: u32) -> u32 {
    let max_dim = width.max(height);
    if max_dim <= 1 {
        return 0;
    }
    // ceil(log2(n)) == bit length of (n - 1)
    u32::BITS - (max_dim - 1).leading_zeros()
}

/// Parse a DZI XML document into a raw descriptor.
///
/// `Image` and `Size` are matched by local name, in the Deep Zoom namespace
/// or in no namespace, so prefixed documents parse the same as default ones.
/// Level bounds are derived from the image size. Numeric attributes that do
/// not parse as integers make the document malformed; values that parse but
/// break geometry invariants are left for validation to report.
pub fn parse_dzi_xml(document: &str) -> Result<RawDescriptor, DescriptorError> {
    let doc = roxmltree::Document::parse(document)
        .map_err(|e| DescriptorError::MalformedDzi(e.to_string()))?;

    let image = doc
        .descendants()
        .find(|node| is_dzi_element(*node, "Image"))
        .ok_or_else(|| DescriptorError::MalformedDzi("missing <Image> element".to_string()))?;
    let size = image
        .children()
        .find(|node| is_dzi_element(*node, "Size"))
        .ok_or_else(|| DescriptorError::MalformedDzi("missing <Size> element".to_string()))?;

    let tile_size = integer_attribute(image, "TileSize")?;
    let tile_overlap = integer_attribute(image, "Overlap")?;
    let width = integer_attribute(size, "Width")?;
    let height = integer_attribute(size, "Height")?;

    let max_level = match (u32::try_from(width), u32::try_from(height)) {
        (Ok(w), Ok(h)) if w > 0 && h > 0 => Some(dzi_max_level(w, h) as i64),
        _ => None,
    };

    Ok(RawDescriptor {
        width: Some(width),
        height: Some(height),
        tile_size: Some(tile_size),
        tile_overlap: Some(tile_overlap),
        min_level: Some(0),
        max_level,
    })
}

/// Render a descriptor as a DZI XML document.
pub fn generate_dzi_xml(descriptor: &PyramidDescriptor, format: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Image xmlns="{ns}"
       Format="{format}"
       Overlap="{overlap}"
       TileSize="{tile_size}">
  <Size Width="{width}" Height="{height}"/>
</Image>"#,
        ns = DZI_NAMESPACE,
        overlap = descriptor.tile_overlap(),
        tile_size = descriptor.tile_size(),
        width = descriptor.width(),
        height = descriptor.height(),
    )
}

fn is_dzi_element(node: roxmltree::Node<'_, '_>, name: &str) -> bool {
    node.is_element()
        && node.tag_name().name() == name
        && matches!(node.tag_name().namespace(), None | Some(DZI_NAMESPACE))
}

fn integer_attribute(
    node: roxmltree::Node<'_, '_>,
    name: &'static str,
) -> Result<i64, DescriptorError> {
    let raw = node
        .attribute(name)
        .ok_or_else(|| DescriptorError::MalformedDzi(format!("missing attribute {name}")))?;
    raw.trim().parse().map_err(|_| {
        DescriptorError::MalformedDzi(format!("attribute {name} is not an integer: {raw:?}"))
    })
}
