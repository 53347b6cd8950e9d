//! MusicXML append algorithm (§4.10): appends one derived `<part>` (and
//! its `<score-part>` entry) to an existing MusicXML document, copying
//! divisions/time-signature metadata from a reference part. Grounded in
//! the quick-xml events API as used by the example pack's MEI serializer
//! (`sonovice-tusk/crates/formats/mei/src/serializer/mod.rs`).

use std::io::Cursor;

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use thiserror::Error;

use crate::types::Note;

#[derive(Debug, Error)]
pub enum XmlAppendError {
    #[error("xml read/write error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("xml attribute error: {0}")]
    Attr(#[from] quick_xml::events::attributes::AttrError),
    #[error("reference part not found in source document")]
    NoReferenceMeasures,
}

type Result<T> = std::result::Result<T, XmlAppendError>;

#[derive(Debug, Clone)]
struct MeasureMeta {
    number: i64,
    attributes_xml: Option<String>,
    beats: i64,
    beat_type: i64,
}

/// Scan `xml` for the reference part's measures: the first part matching
/// `reference_part_id`, else the first `<part>` in the document.
fn scan_reference_measures(xml: &str, reference_part_id: Option<&str>) -> Result<(i64, Vec<MeasureMeta>)> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut divisions: i64 = 1;
    let mut measures = Vec::new();

    let mut in_target_part = false;
    let mut matched_any_part = false;
    let mut current_measure_number = 0i64;
    let mut current_attrs: Option<String> = None;
    let mut current_beats = 4i64;
    let mut current_beat_type = 4i64;
    let mut in_attributes = false;
    let mut attr_depth = 0i32;
    let mut buf = Vec::new();
    let mut text_buf = String::new();
    let mut in_divisions = false;
    let mut in_beats = false;
    let mut in_beat_type = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Eof => break,
            Event::Start(e) => {
                let name = e.name();
                let local = String::from_utf8_lossy(name.as_ref()).to_string();
                match local.as_str() {
                    "part" => {
                        let id = e
                            .attributes()
                            .flatten()
                            .find(|a| a.key.as_ref() == b"id")
                            .map(|a| a.value.to_vec());
                        let id_str = id.map(|v| String::from_utf8_lossy(&v).to_string());
                        in_target_part = match reference_part_id {
                            Some(wanted) => id_str.as_deref() == Some(wanted),
                            None => !matched_any_part,
                        };
                        if in_target_part {
                            matched_any_part = true;
                        }
                    }
                    "measure" if in_target_part => {
                        let num = e
                            .attributes()
                            .flatten()
                            .find(|a| a.key.as_ref() == b"number")
                            .and_then(|a| String::from_utf8_lossy(&a.value).parse::<i64>().ok())
                            .unwrap_or(current_measure_number + 1);
                        current_measure_number = num;
                        current_attrs = None;
                    }
                    "attributes" if in_target_part => {
                        in_attributes = true;
                        attr_depth = 0;
                    }
                    "divisions" if in_attributes => {
                        in_divisions = true;
                        text_buf.clear();
                    }
                    "beats" if in_attributes => {
                        in_beats = true;
                        text_buf.clear();
                    }
                    "beat-type" if in_attributes => {
                        in_beat_type = true;
                        text_buf.clear();
                    }
                    _ => {
                        if in_attributes {
                            attr_depth += 1;
                        }
                    }
                }
            }
            Event::Text(t) if in_target_part && (in_divisions || in_beats || in_beat_type) => {
                text_buf.push_str(&t.unescape()?);
            }
            Event::End(e) => {
                let local = String::from_utf8_lossy(e.name().as_ref()).to_string();
                match local.as_str() {
                    "part" => in_target_part = false,
                    "measure" if in_target_part => {
                        measures.push(MeasureMeta {
                            number: current_measure_number,
                            attributes_xml: current_attrs.take(),
                            beats: current_beats,
                            beat_type: current_beat_type,
                        });
                    }
                    "attributes" if in_target_part => {
                        in_attributes = false;
                    }
                    "divisions" if in_divisions => {
                        if let Ok(v) = text_buf.trim().parse::<i64>() {
                            divisions = v;
                            current_attrs = Some(format!("<divisions>{}</divisions>", v));
                        }
                        in_divisions = false;
                    }
                    "beats" if in_beats => {
                        if let Ok(v) = text_buf.trim().parse::<i64>() {
                            current_beats = v;
                        }
                        in_beats = false;
                    }
                    "beat-type" if in_beat_type => {
                        if let Ok(v) = text_buf.trim().parse::<i64>() {
                            current_beat_type = v;
                        }
                        in_beat_type = false;
                    }
                    _ => {}
                }
            }
            _ => {}
        }
        buf.clear();
    }

    if measures.is_empty() {
        return Err(XmlAppendError::NoReferenceMeasures);
    }
    Ok((divisions, measures))
}

fn note_type_name(duration_beats: f64) -> &'static str {
    if duration_beats >= 3.5 {
        "whole"
    } else if duration_beats >= 1.75 {
        "half"
    } else if duration_beats >= 0.875 {
        "quarter"
    } else if duration_beats >= 0.4375 {
        "eighth"
    } else {
        "16th"
    }
}

/// `(step, alter, octave)` from a MIDI pitch number, using the sharps
/// spelling (no stored step/alter/octave survives on `Note`, so this is
/// always computed).
fn midi_to_pitch(midi: f64) -> (char, i32, i32) {
    const STEPS: [(char, i32); 12] =
        [('C', 0), ('C', 1), ('D', 0), ('D', 1), ('E', 0), ('F', 0), ('F', 1), ('G', 0), ('G', 1), ('A', 0), ('A', 1), ('B', 0)];
    let rounded = midi.round() as i64;
    let pitch_class = rounded.rem_euclid(12) as usize;
    let octave = (rounded / 12) - 1;
    let (step, alter) = STEPS[pitch_class];
    (step, alter, octave as i32)
}

fn write_note(writer: &mut Writer<Cursor<Vec<u8>>>, note: &Note, divisions: i64) -> Result<()> {
    let duration = ((note.duration_beats * divisions as f64).round() as i64).max(1);
    writer.write_event(Event::Start(BytesStart::new("note")))?;

    if note.is_rest || note.pitch_midi.is_none() {
        writer.write_event(Event::Empty(BytesStart::new("rest")))?;
    } else {
        let (step, alter, octave) = midi_to_pitch(note.pitch_midi.unwrap());
        writer.write_event(Event::Start(BytesStart::new("pitch")))?;
        write_text_elem(writer, "step", &step.to_string())?;
        if alter != 0 {
            write_text_elem(writer, "alter", &alter.to_string())?;
        }
        write_text_elem(writer, "octave", &octave.to_string())?;
        writer.write_event(Event::End(BytesEnd::new("pitch")))?;
    }

    write_text_elem(writer, "duration", &duration.to_string())?;
    write_text_elem(writer, "voice", &note.voice)?;
    write_text_elem(writer, "type", note_type_name(note.duration_beats))?;

    if let Some(lyric) = note.lyric.as_deref() {
        if !lyric.is_empty() {
            writer.write_event(Event::Start(BytesStart::new("lyric")))?;
            write_text_elem(writer, "text", lyric)?;
            writer.write_event(Event::End(BytesEnd::new("lyric")))?;
        }
    }

    writer.write_event(Event::End(BytesEnd::new("note")))?;
    Ok(())
}

fn write_text_elem(writer: &mut Writer<Cursor<Vec<u8>>>, name: &str, text: &str) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

/// Build the standalone `<part>...</part>` XML for the derived part,
/// using `reference_measures` to drive per-measure attributes/rests for
/// measures the target left untouched.
fn build_part_xml(part_id: &str, notes: &[Note], divisions: i64, measures: &[MeasureMeta]) -> Result<String> {
    let mut by_measure: std::collections::BTreeMap<i64, Vec<&Note>> = std::collections::BTreeMap::new();
    for note in notes {
        by_measure.entry(note.measure_number).or_default().push(note);
    }

    let mut writer = Writer::new(Cursor::new(Vec::new()));
    let mut part_start = BytesStart::new("part");
    part_start.push_attribute(("id", part_id));
    writer.write_event(Event::Start(part_start))?;

    for (i, meta) in measures.iter().enumerate() {
        let mut measure_start = BytesStart::new("measure");
        measure_start.push_attribute(("number", meta.number.to_string().as_str()));
        writer.write_event(Event::Start(measure_start))?;

        if i == 0 {
            writer.write_event(Event::Start(BytesStart::new("attributes")))?;
            write_text_elem(&mut writer, "divisions", &divisions.to_string())?;
            writer.write_event(Event::Start(BytesStart::new("time")))?;
            write_text_elem(&mut writer, "beats", &meta.beats.to_string())?;
            write_text_elem(&mut writer, "beat-type", &meta.beat_type.to_string())?;
            writer.write_event(Event::End(BytesEnd::new("time")))?;
            writer.write_event(Event::End(BytesEnd::new("attributes")))?;
        }

        match by_measure.get(&meta.number) {
            Some(notes) => {
                for note in notes {
                    write_note(&mut writer, note, divisions)?;
                }
            }
            None => {
                let full_duration = divisions * meta.beats;
                writer.write_event(Event::Start(BytesStart::new("note")))?;
                writer.write_event(Event::Empty(BytesStart::new("rest")))?;
                write_text_elem(&mut writer, "duration", &full_duration.to_string())?;
                writer.write_event(Event::End(BytesEnd::new("note")))?;
            }
        }

        writer.write_event(Event::End(BytesEnd::new("measure")))?;
    }

    writer.write_event(Event::End(BytesEnd::new("part")))?;
    Ok(String::from_utf8(writer.into_inner().into_inner())?)
}

/// Append the derived part identified by `part_id`/`part_name` to `xml`,
/// sourcing per-measure structure from `reference_part_id` (or the first
/// part, if `None`). Returns the full updated document.
pub fn append_derived_part(
    xml: &str,
    part_id: &str,
    part_name: &str,
    reference_part_id: Option<&str>,
    notes: &[Note],
) -> Result<String> {
    let (divisions, measures) = scan_reference_measures(xml, reference_part_id)?;
    let part_xml = build_part_xml(part_id, notes, divisions, &measures)?;

    let score_part_xml = format!(
        "<score-part id=\"{}\"><part-name>{}</part-name></score-part>",
        escape_xml(part_id),
        escape_xml(part_name)
    );

    let with_score_part = match xml.rfind("</part-list>") {
        Some(idx) => {
            let mut out = String::with_capacity(xml.len() + score_part_xml.len());
            out.push_str(&xml[..idx]);
            out.push_str(&score_part_xml);
            out.push_str(&xml[idx..]);
            out
        }
        None => xml.to_string(),
    };

    match with_score_part.rfind("</score-partwise>") {
        Some(idx) => {
            let mut out = String::with_capacity(with_score_part.len() + part_xml.len());
            out.push_str(&with_score_part[..idx]);
            out.push_str(&part_xml);
            out.push_str(&with_score_part[idx..]);
            Ok(out)
        }
        None => Ok(format!("{}{}", with_score_part, part_xml)),
    }
}

fn escape_xml(value: &str) -> String {
    value.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// Strip any trailing `.derived_<10-hex>` suffix (repeatedly) from a file
/// stem so chained derivations never compound.
pub fn normalize_stem(stem: &str) -> String {
    lazy_static::lazy_static! {
        static ref DERIVED_SUFFIX: regex::Regex = regex::Regex::new(r"\.derived_[0-9a-fA-F]{10}$").unwrap();
    }
    let mut current = stem.to_string();
    while let Some(m) = DERIVED_SUFFIX.find(&current) {
        current.truncate(m.start());
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0"?>
<score-partwise>
<part-list><score-part id="P1"><part-name>Soprano</part-name></score-part></part-list>
<part id="P1">
<measure number="1">
<attributes><divisions>4</divisions><time><beats>4</beats><beat-type>4</beat-type></time></attributes>
<note><pitch><step>C</step><octave>4</octave></pitch><duration>16</duration><voice>1</voice><type>whole</type></note>
</measure>
</part>
</score-partwise>"#;

    fn note(measure: i64, offset: f64, duration: f64, pitch: f64, lyric: Option<&str>) -> Note {
        Note {
            offset_beats: offset,
            duration_beats: duration,
            pitch_midi: Some(pitch),
            lyric: lyric.map(|s| s.to_string()),
            syllabic: None,
            lyric_is_extended: false,
            is_rest: false,
            tie_type: None,
            voice: "1".to_string(),
            staff: "1".to_string(),
            measure_number: measure,
            lyric_exempt: false,
        }
    }

    #[test]
    fn scan_reference_measures_reads_divisions_and_time_signature() {
        let (divisions, measures) = scan_reference_measures(SAMPLE, Some("P1")).unwrap();
        assert_eq!(divisions, 4);
        assert_eq!(measures.len(), 1);
        assert_eq!(measures[0].beats, 4);
        assert_eq!(measures[0].beat_type, 4);
    }

    #[test]
    fn append_derived_part_inserts_score_part_and_part() {
        let notes = vec![note(1, 0.0, 4.0, 62.0, Some("la"))];
        let result = append_derived_part(SAMPLE, "P_DERIVED_ABCDEF0123", "Soprano - alto (Derived)", Some("P1"), &notes).unwrap();
        assert!(result.contains("P_DERIVED_ABCDEF0123"));
        assert!(result.contains("Soprano - alto (Derived)"));
        assert!(result.contains("<step>D</step>"));
    }

    #[test]
    fn normalize_stem_strips_repeated_derived_suffix() {
        let stem = "anthem.derived_abc0123456.derived_def0123456";
        assert_eq!(normalize_stem(stem), "anthem");
    }

    #[test]
    fn normalize_stem_is_noop_without_suffix() {
        assert_eq!(normalize_stem("anthem"), "anthem");
    }
}
