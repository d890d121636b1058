//! XMP packets: reading rating/label/keywords and writing sidecars.
//!
//! Reading is a tolerant scan rather than a full RDF parse. Lightroom, Camera
//! Raw, Bridge and darktable write the properties either as attributes on
//! `rdf:Description` or as child elements, so both spellings are matched.

use std::fmt::Write as _;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use common::{ColorLabel, EmbeddedTags};
use regex::Regex;

const PACKET_START: &[u8] = b"<x:xmpmeta";
const PACKET_END: &[u8] = b"</x:xmpmeta>";

/// Locate the first `x:xmpmeta` packet embedded in a file.
pub fn find_xmp_packet(bytes: &[u8]) -> Option<String> {
    let start = find(bytes, PACKET_START)?;
    let end = find(&bytes[start..], PACKET_END)? + start + PACKET_END.len();
    Some(String::from_utf8_lossy(&bytes[start..end]).into_owned())
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Properties read by [`parse_tags`].
const TAG_PROPERTIES: &[&str] = &[
    "crs:Rating",
    "xmp:Rating",
    "crs:Label",
    "xmp:Label",
    "photoshop:Urgency",
];

/// `prefix:Name="value"` or `<prefix:Name>value</prefix:Name>`, per property.
static PROPERTY_PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    TAG_PROPERTIES
        .iter()
        .filter_map(|qualified| {
            let q = regex::escape(qualified);
            Regex::new(&format!(
                r#"(?s)\b{q}\s*=\s*["']([^"']*)["']|<{q}>\s*([^<]*?)\s*</{q}>"#
            ))
            .ok()
            .map(|re| (*qualified, re))
        })
        .collect()
});

static SUBJECT_BAG: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?s)<dc:subject>\s*<rdf:(?:Bag|Seq)[^>]*>(.*?)</rdf:(?:Bag|Seq)>\s*</dc:subject>")
        .ok()
});

static SUBJECT_ITEM: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?s)<rdf:li[^>]*>(.*?)</rdf:li>").ok());

fn property(xmp: &str, qualified: &str) -> Option<String> {
    let (_, re) = PROPERTY_PATTERNS.iter().find(|(q, _)| *q == qualified)?;
    let caps = re.captures(xmp)?;
    let value = caps.get(1).or_else(|| caps.get(2))?.as_str().trim();
    (!value.is_empty()).then(|| unescape(value))
}

fn subjects(xmp: &str) -> Vec<String> {
    let (Some(bag), Some(item)) = (SUBJECT_BAG.as_ref(), SUBJECT_ITEM.as_ref()) else {
        return Vec::new();
    };

    let mut keywords: Vec<String> = Vec::new();
    if let Some(list) = bag.captures(xmp).and_then(|c| c.get(1)) {
        for li in item.captures_iter(list.as_str()) {
            let keyword = unescape(li[1].trim());
            if !keyword.is_empty() && !keywords.contains(&keyword) {
                keywords.push(keyword);
            }
        }
    }
    keywords
}

/// Extract rating, color label and keywords.
///
/// Precedence for rating and label is Camera Raw (`crs:`) first, then the
/// plain XMP properties. A Photoshop urgency supplies the label when no
/// explicit one is present.
pub fn parse_tags(xmp: &str) -> EmbeddedTags {
    let rating = ["crs:Rating", "xmp:Rating"]
        .iter()
        .find_map(|p| property(xmp, p))
        .and_then(|r| r.parse::<f32>().ok())
        .filter(|r| *r >= 0.0)
        .map(|r| r.round().min(5.0) as u8);

    let label = ["crs:Label", "xmp:Label"]
        .iter()
        .find_map(|p| property(xmp, p))
        .and_then(|l| l.parse::<ColorLabel>().ok())
        .filter(|l| !l.is_none())
        .or_else(|| {
            property(xmp, "photoshop:Urgency")
                .and_then(|u| u.parse::<u8>().ok())
                .and_then(ColorLabel::from_urgency)
        });

    EmbeddedTags {
        rating,
        label,
        keywords: subjects(xmp),
    }
}

fn unescape(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

/// Values written into a generated sidecar.
#[derive(Debug, Clone, Default)]
pub struct SidecarFields {
    pub creator_tool: String,
    pub create_date: Option<DateTime<Utc>>,
    pub modify_date: Option<DateTime<Utc>>,
    pub make: Option<String>,
    pub model: Option<String>,
    pub software: Option<String>,
    /// EXIF orientation 1..=8.
    pub orientation: Option<u8>,
    pub label: ColorLabel,
    pub rating: Option<u8>,
    pub keywords: Vec<String>,
    pub description: Option<String>,
}

/// EXIF orientation names. `tiff:Orientation` stores the number, so this
/// doubles as the validity check for it.
pub fn orientation_name(value: u8) -> Option<&'static str> {
    Some(match value {
        1 => "Horizontal (normal)",
        2 => "Mirror horizontal",
        3 => "Rotate 180",
        4 => "Mirror vertical",
        5 => "Mirror horizontal and rotate 270 CW",
        6 => "Rotate 90 CW",
        7 => "Mirror horizontal and rotate 90 CW",
        8 => "Rotate 270 CW",
        _ => return None,
    })
}

/// Render a standalone RDF/XML sidecar.
pub fn render_sidecar(fields: &SidecarFields) -> String {
    let mut attrs = String::new();
    let mut attr = |name: &str, value: &str| {
        let _ = write!(attrs, "\n      {name}=\"{}\"", escape(value));
    };

    attr("xmp:CreatorTool", &fields.creator_tool);
    if let Some(d) = fields.create_date {
        attr("xmp:CreateDate", &d.format("%Y-%m-%dT%H:%M:%SZ").to_string());
        attr("photoshop:DateCreated", &d.format("%Y-%m-%dT%H:%M:%SZ").to_string());
    }
    if let Some(d) = fields.modify_date {
        attr("xmp:ModifyDate", &d.format("%Y-%m-%dT%H:%M:%SZ").to_string());
    }
    if let Some(make) = &fields.make {
        attr("tiff:Make", make);
    }
    if let Some(model) = &fields.model {
        attr("tiff:Model", model);
    }
    if let Some(software) = &fields.software {
        attr("tiff:Software", software);
    }
    if let Some(o) = fields.orientation.filter(|o| orientation_name(*o).is_some()) {
        attr("tiff:Orientation", &o.to_string());
    }
    if !fields.label.is_none() {
        attr("xmp:Label", fields.label.as_str());
    }
    if let Some(rating) = fields.rating {
        attr("xmp:Rating", &rating.min(5).to_string());
    }

    let mut body = String::new();
    if !fields.keywords.is_empty() {
        body.push_str("\n      <dc:subject>\n        <rdf:Bag>");
        for keyword in &fields.keywords {
            let _ = write!(body, "\n          <rdf:li>{}</rdf:li>", escape(keyword));
        }
        body.push_str("\n        </rdf:Bag>\n      </dc:subject>");
    }
    if let Some(description) = fields.description.as_deref().filter(|d| !d.is_empty()) {
        let _ = write!(
            body,
            "\n      <dc:description>\n        <rdf:Alt>\n          <rdf:li xml:lang=\"x-default\">{}</rdf:li>\n        </rdf:Alt>\n      </dc:description>",
            escape(description)
        );
    }

    format!(
        r#"<?xpacket begin="" id="W5M0MpCehiHzreSzNTczkc9d"?>
<x:xmpmeta xmlns:x="adobe:ns:meta/" x:xmptk="{tool}">
  <rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#">
    <rdf:Description rdf:about=""
      xmlns:xmp="http://ns.adobe.com/xap/1.0/"
      xmlns:tiff="http://ns.adobe.com/tiff/1.0/"
      xmlns:dc="http://purl.org/dc/elements/1.1/"
      xmlns:photoshop="http://ns.adobe.com/photoshop/1.0/"{attrs}>{body}
    </rdf:Description>
  </rdf:RDF>
</x:xmpmeta>
<?xpacket end="w"?>
"#,
        tool = escape(&fields.creator_tool),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn patterns_compile_once_for_every_property() {
        let names: Vec<&str> = PROPERTY_PATTERNS.iter().map(|(q, _)| *q).collect();
        assert_eq!(names, TAG_PROPERTIES);
        assert!(SUBJECT_BAG.is_some());
        assert!(SUBJECT_ITEM.is_some());
        assert_eq!(property(r#"<rdf:Description xmp:Rating="4"/>"#, "xmp:Rating").as_deref(), Some("4"));
        assert_eq!(property(r#"<rdf:Description xmp:Rating="4"/>"#, "xmp:Unknown"), None);
    }

    const LIGHTROOM: &str = r#"<x:xmpmeta xmlns:x="adobe:ns:meta/">
 <rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#">
  <rdf:Description rdf:about=""
    crs:Rating="3"
    xmp:Rating="1"
    photoshop:Urgency="5">
   <dc:subject>
    <rdf:Bag>
     <rdf:li>beach</rdf:li>
     <rdf:li>sun &amp; sea</rdf:li>
     <rdf:li>beach</rdf:li>
    </rdf:Bag>
   </dc:subject>
  </rdf:Description>
 </rdf:RDF>
</x:xmpmeta>"#;

    #[test]
    fn camera_raw_rating_wins_and_urgency_supplies_label() {
        let tags = parse_tags(LIGHTROOM);
        assert_eq!(tags.rating, Some(3));
        assert_eq!(tags.label, Some(ColorLabel::Blue));
        assert_eq!(tags.keywords, vec!["beach", "sun & sea"]);
    }

    #[test]
    fn element_form_is_read() {
        let xmp = "<x:xmpmeta><xmp:Rating>5</xmp:Rating><xmp:Label>Red</xmp:Label></x:xmpmeta>";
        let tags = parse_tags(xmp);
        assert_eq!(tags.rating, Some(5));
        assert_eq!(tags.label, Some(ColorLabel::Red));
        assert!(tags.keywords.is_empty());
    }

    #[test]
    fn finds_packet_inside_binary() {
        let mut file = vec![0xFF, 0xD8, 0x00, 0x12];
        file.extend_from_slice(LIGHTROOM.as_bytes());
        file.extend_from_slice(&[0xFF, 0xD9]);
        let packet = find_xmp_packet(&file).unwrap();
        assert!(packet.starts_with("<x:xmpmeta"));
        assert!(packet.ends_with("</x:xmpmeta>"));
        assert!(find_xmp_packet(b"no packet here").is_none());
    }

    #[test]
    fn sidecar_round_trips_tags() {
        let fields = SidecarFields {
            creator_tool: "lumen".into(),
            create_date: Some(Utc.with_ymd_and_hms(2020, 1, 2, 3, 4, 5).unwrap()),
            make: Some("Canon".into()),
            orientation: Some(6),
            label: ColorLabel::Green,
            rating: Some(4),
            keywords: vec!["a<b".into(), "trip".into()],
            description: Some("At \"home\"".into()),
            ..SidecarFields::default()
        };
        let xml = render_sidecar(&fields);
        assert!(xml.contains(r#"xmp:CreateDate="2020-01-02T03:04:05Z""#));
        assert!(xml.contains(r#"tiff:Orientation="6""#));
        assert!(xml.contains("a&lt;b"));
        assert!(xml.contains("At &quot;home&quot;"));

        let packet = find_xmp_packet(xml.as_bytes()).unwrap();
        let tags = parse_tags(&packet);
        assert_eq!(tags.rating, Some(4));
        assert_eq!(tags.label, Some(ColorLabel::Green));
        assert_eq!(tags.keywords, vec!["a<b", "trip"]);
    }

    #[test]
    fn orientation_names_cover_exif_range() {
        assert_eq!(orientation_name(1), Some("Horizontal (normal)"));
        assert_eq!(orientation_name(8), Some("Rotate 270 CW"));
        assert_eq!(orientation_name(9), None);
    }
}
