//! Client-side view of registry records, as served by the list operation.
use std::collections::BTreeMap;

use chrono::{
    DateTime,
    Utc,
};
use serde::{
    Deserialize,
    Serialize,
};
use url::Url;

use crate::record::FileRecord;

/// One listed file. The tag is the key of the listing object on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    #[serde(default, skip_serializing)]
    pub tag: String,
    pub name: String,
    pub date: DateTime<Utc>,
    pub url: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub digest: String,
}

/// Wire form of a full listing.
pub type Listing = BTreeMap<String, FileEntry>;

impl FileEntry {

    /// Project a stored record, pointing its url below `base`.
    pub fn from_record(r: &FileRecord, base: &Url) -> FileEntry {
        let url = match base.join(&encode_tag(&r.tag)) {
            Ok(v) => v.to_string(),
            Err(_) => format!("{}{}", base, encode_tag(&r.tag)),
        };
        FileEntry {
            tag: r.tag.clone(),
            name: r.name.clone(),
            date: r.created_at,
            url,
            size: r.size,
            digest: r.digest.clone(),
        }
    }

    /// One line of `ls` output.
    ///
    /// # Arguments
    ///
    /// * `align` - Width the tag column is padded to.
    /// * `exact` - Print the timestamp instead of its age.
    /// * `now` - Reference for the age.
    pub fn render(&self, align: usize, exact: bool, now: DateTime<Utc>) -> String {
        let when = if exact {
            self.date.to_rfc3339()
        } else {
            humanize(now - self.date)
        };
        format!("{:<width$}  {}  ({})", self.tag, self.name, when, width = align)
    }
}

/// A tag as one relative URL path segment.
pub fn encode_tag(tag: &str) -> String {
    urlencoding::encode(tag).into_owned()
}

/// Build the listing object the service returns.
pub fn to_listing(records: &[FileRecord], base: &Url) -> Listing {
    records
        .iter()
        .map(|r| (r.tag.clone(), FileEntry::from_record(r, base)))
        .collect()
}

/// Flatten a listing back into entries ordered by tag.
pub fn from_listing(listing: Listing) -> Vec<FileEntry> {
    listing
        .into_iter()
        .map(|(tag, mut e)| {
            e.tag = tag;
            e
        })
        .collect()
}

fn plural(n: i64, unit: &str) -> String {
    if n == 1 {
        let article = if unit == "hour" { "an" } else { "a" };
        format!("{} {} ago", article, unit)
    } else {
        format!("{} {}s ago", n, unit)
    }
}

/// Relative age in the coarse style of "3 minutes ago".
pub fn humanize(age: chrono::Duration) -> String {
    let s = age.num_seconds();
    if s < 0 {
        return String::from("in the future");
    }
    if s < 10 {
        return String::from("just now");
    }
    if s < 45 {
        return format!("{} seconds ago", s);
    }
    if s < 90 {
        return plural(1, "minute");
    }
    let m = (s + 30) / 60;
    if m < 45 {
        return plural(m, "minute");
    }
    let h = (m + 30) / 60;
    if h < 22 {
        return plural(h, "hour");
    }
    let d = (h + 12) / 24;
    if d < 26 {
        return plural(d, "day");
    }
    if d < 345 {
        return plural((d + 15) / 30, "month");
    }
    plural((d + 182) / 365, "year")
}

#[cfg(test)]
mod tests {
    use super::{
        encode_tag,
        from_listing,
        humanize,
        to_listing,
        FileEntry,
        Listing,
    };
    use crate::record::FileRecord;
    use chrono::{
        Duration,
        TimeZone,
        Utc,
    };
    use url::Url;

    fn record(tag: &str) -> FileRecord {
        FileRecord {
            tag: tag.to_string(),
            name: format!("{}.bin", tag),
            created_at: Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap(),
            size: 4,
            digest: String::from("abcd"),
            blob: String::from("deadbeef"),
        }
    }

    #[test]
    fn test_listing_wire_shape() {
        let base = Url::parse("http://localhost:5000/files/").unwrap();
        let listing = to_listing(&[record("b"), record("a b")], &base);
        let json = serde_json::to_value(&listing).unwrap();

        let entry = &json["a b"];
        assert_eq!(entry["name"], "a b.bin");
        assert_eq!(entry["url"], "http://localhost:5000/files/a%20b");
        assert!(entry.get("tag").is_none());
        assert!(entry.get("blob").is_none());

        let back: Listing = serde_json::from_value(json).unwrap();
        let entries = from_listing(back);
        let tags: Vec<&str> = entries.iter().map(|e| e.tag.as_str()).collect();
        assert_eq!(tags, vec!["a b", "b"]);
    }

    #[test]
    fn test_encode_tag() {
        let base = Url::parse("http://localhost:5000/files/").unwrap();
        assert_eq!(encode_tag("a/b c"), "a%2Fb%20c");
        assert_eq!(base.join(&encode_tag("?x#y")).unwrap().as_str(), "http://localhost:5000/files/%3Fx%23y");
        assert_eq!(base.join(&encode_tag("x.tar.gz")).unwrap().as_str(), "http://localhost:5000/files/x.tar.gz");
    }

    #[test]
    fn test_render() {
        let base = Url::parse("http://localhost:5000/files/").unwrap();
        let e = FileEntry::from_record(&record("foo"), &base);
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 10, 3, 0).unwrap();
        assert_eq!(e.render(5, false, now), "foo    foo.bin  (3 minutes ago)");
        assert_eq!(e.render(0, true, now), "foo  foo.bin  (2024-03-01T10:00:00+00:00)");
    }

    #[test]
    fn test_humanize() {
        assert_eq!(humanize(Duration::seconds(3)), "just now");
        assert_eq!(humanize(Duration::seconds(30)), "30 seconds ago");
        assert_eq!(humanize(Duration::seconds(60)), "a minute ago");
        assert_eq!(humanize(Duration::minutes(10)), "10 minutes ago");
        assert_eq!(humanize(Duration::minutes(60)), "an hour ago");
        assert_eq!(humanize(Duration::hours(5)), "5 hours ago");
        assert_eq!(humanize(Duration::days(3)), "3 days ago");
        assert_eq!(humanize(Duration::days(400)), "a year ago");
    }
}
