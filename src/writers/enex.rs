use anyhow::Result;
use chrono::{DateTime, Utc};
use quick_xml::escape::escape;
use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use super::{PageDocument, PageWriter, TargetFormat};

const APPLICATION: &str = "OneNote Exporter";
const ENEX_DOCTYPE: &str = r#"en-export SYSTEM "http://xml.evernote.com/pub/evernote-export3.dtd""#;
const ENEX_DATE: &str = "%Y%m%dT%H%M%SZ";

/// One-note Evernote export file. The page's raw HTML is embedded escaped inside
/// the ENML body so it survives as text rather than being parsed as elements.
pub struct EnexWriter;

impl PageWriter for EnexWriter {
    fn format(&self) -> TargetFormat {
        TargetFormat::Evernote
    }

    fn render(&self, doc: &PageDocument<'_>) -> Result<String> {
        let page = doc.page;
        let export_date = doc.exported_at.format(ENEX_DATE).to_string();

        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        writer.write_event(Event::DocType(BytesText::from_escaped(ENEX_DOCTYPE)))?;
        writer.write_event(Event::Start(BytesStart::new("en-export").with_attributes([
            ("export-date", export_date.as_str()),
            ("application", APPLICATION),
            ("version", "1.0"),
        ])))?;
        writer.write_event(Event::Start(BytesStart::new("note")))?;

        text_element(&mut writer, "title", &page.title)?;
        writer.write_event(Event::Start(BytesStart::new("content")))?;
        writer.write_event(Event::CData(BytesCData::new(enml(&page.markup))))?;
        writer.write_event(Event::End(BytesEnd::new("content")))?;
        text_element(&mut writer, "created", &enex_timestamp(&page.created))?;
        text_element(&mut writer, "updated", &enex_timestamp(&page.modified))?;

        writer.write_event(Event::Start(BytesStart::new("note-attributes")))?;
        text_element(&mut writer, "author", &page.author)?;
        writer.write_event(Event::End(BytesEnd::new("note-attributes")))?;

        writer.write_event(Event::End(BytesEnd::new("note")))?;
        writer.write_event(Event::End(BytesEnd::new("en-export")))?;

        let mut out = String::from_utf8(writer.into_inner())?;
        out.push('\n');
        Ok(out)
    }
}

fn text_element(writer: &mut Writer<Vec<u8>>, name: &str, text: &str) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::from_escaped(escape(text))))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

/// ENML envelope around the escaped page markup.
fn enml(markup: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <!DOCTYPE en-note SYSTEM \"http://xml.evernote.com/pub/enml2.dtd\">\n\
         <en-note>\n{}\n</en-note>",
        escape(markup)
    )
}

/// ISO-8601 → `YYYYMMDDTHHMMSSZ`. Unparseable values pass through.
fn enex_timestamp(value: &str) -> String {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc).format(ENEX_DATE).to_string())
        .unwrap_or_else(|_| value.to_string())
}
