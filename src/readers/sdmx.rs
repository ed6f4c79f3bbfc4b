use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::name::QName;
use quick_xml::Reader;
use tracing::info;

use crate::errors::{Error, ParseError};
use crate::models::{Attribute, Code, Codelist, Dimension, Dsd, Measure};

/// Parse a DSD from an SDMX structure message. The message may be a plain
/// structure document or a dataflow response with the referenced structure
/// inlined (`?references=datastructure`); either way the first
/// DataStructureDefinition found is the one returned.
pub fn parse_dsd(path: &Path) -> Result<Dsd, Error> {
    info!(path = %path.display(), "Parsing DSD from SDMX structure message");

    let mut reader = Reader::from_reader(BufReader::new(File::open(path)?));
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if local_eq(&e, "DataStructure") || local_eq(&e, "DataStructureDefinition") => {
                return parse_data_structure(&mut reader, &e);
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Err(Error::Parsing(ParseError::NotFound(
        "a DataStructureDefinition in the SDMX message".to_string(),
    )))
}

/// Parse a codelist message into a code map.
pub fn parse_codelist(path: &Path) -> Result<Codelist, Error> {
    info!(path = %path.display(), "Parsing codelist from SDMX structure message");

    let mut reader = Reader::from_reader(BufReader::new(File::open(path)?));
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if local_eq(&e, "Codelist") => {
                return parse_codelist_element(&mut reader, &e);
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Err(Error::Parsing(ParseError::NotFound(
        "a Codelist in the SDMX message".to_string(),
    )))
}

fn parse_data_structure<T: BufRead>(reader: &mut Reader<T>, start: &BytesStart) -> Result<Dsd, Error> {
    let id = require_attribute(reader, start, "id")?;
    let version = attribute(reader, start, "version")?.unwrap_or_else(|| "1.0".to_string());
    let element = start.local_name().as_ref().to_vec();

    let mut name = LangText::default();
    let mut dimensions: Vec<Dimension> = Vec::new();
    let mut attributes: Vec<Attribute> = Vec::new();
    let mut measures: Vec<Measure> = Vec::new();
    let mut primary_measure_id: Option<String> = None;
    // encounter order across the whole component list
    let mut position = 0;

    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if local_eq(&e, "Dimension") => {
                let component = parse_component(reader, &e)?;
                dimensions.push(Dimension {
                    id: component.id,
                    name: component.name,
                    codelist_id: component.codelist_id,
                    position,
                    data_type: component.data_type,
                });
                position += 1;
            }

            // the time axis is stored in the dedicated time_period column,
            // never as a regular dimension
            Event::Start(e) if local_eq(&e, "TimeDimension") => skip_element(reader, &e)?,
            Event::Empty(e) if local_eq(&e, "TimeDimension") => {}

            Event::Start(e) if local_eq(&e, "Attribute") => {
                let component = parse_component(reader, &e)?;
                attributes.push(Attribute {
                    id: component.id,
                    name: component.name,
                    codelist_id: component.codelist_id,
                    data_type: component.data_type,
                });
                position += 1;
            }

            Event::Start(e) if local_eq(&e, "Measure") || local_eq(&e, "PrimaryMeasure") => {
                let component = parse_component(reader, &e)?;
                primary_measure_id = Some(component.id.clone());
                measures.push(Measure {
                    id: component.id,
                    name: component.name,
                    data_type: component.data_type,
                });
                position += 1;
            }

            Event::Empty(e) if local_eq(&e, "Dimension") => {
                dimensions.push(Dimension {
                    id: require_attribute(reader, &e, "id")?,
                    name: None,
                    codelist_id: None,
                    position,
                    data_type: None,
                });
                position += 1;
            }

            Event::Start(e) if local_eq(&e, "Name") => {
                let lang = attribute(reader, &e, "xml:lang")?;
                let text = read_text(reader, &e)?;
                name.offer(lang.as_deref(), text);
            }

            Event::End(e) if end_eq(&e, &element) => break,
            Event::Eof => {
                return Err(Error::Parsing(ParseError::NotFound(format!(
                    "closing tag for {}",
                    String::from_utf8_lossy(&element)
                ))))
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(Dsd {
        id,
        name: name.take(),
        version,
        dimensions,
        attributes,
        measures,
        primary_measure_id: primary_measure_id.unwrap_or_else(|| "obs_value".to_string()),
    })
}

struct Component {
    id: String,
    name: Option<String>,
    codelist_id: Option<String>,
    data_type: Option<String>,
}

fn parse_component<T: BufRead>(reader: &mut Reader<T>, start: &BytesStart) -> Result<Component, Error> {
    let id = require_attribute(reader, start, "id")?;
    let element = start.local_name().as_ref().to_vec();

    let mut name = LangText::default();
    let mut codelist_id = None;
    let mut data_type = None;

    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            // <Enumeration><Ref id="CL_..."/></Enumeration>
            Event::Start(e) if local_eq(&e, "Enumeration") => {
                codelist_id = parse_enumeration_ref(reader)?;
            }

            Event::Empty(e) if local_eq(&e, "TextFormat") => {
                data_type = attribute(reader, &e, "textType")?;
            }
            Event::Start(e) if local_eq(&e, "TextFormat") => {
                data_type = attribute(reader, &e, "textType")?;
                skip_element(reader, &e)?;
            }

            Event::Start(e) if local_eq(&e, "Name") => {
                let lang = attribute(reader, &e, "xml:lang")?;
                let text = read_text(reader, &e)?;
                name.offer(lang.as_deref(), text);
            }

            Event::End(e) if end_eq(&e, &element) => break,
            Event::Eof => {
                return Err(Error::Parsing(ParseError::NotFound(format!(
                    "closing tag for component {id}"
                ))))
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(Component {
        id,
        name: name.take(),
        codelist_id,
        data_type,
    })
}

fn parse_enumeration_ref<T: BufRead>(reader: &mut Reader<T>) -> Result<Option<String>, Error> {
    let mut codelist_id = None;
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Empty(e) | Event::Start(e) if local_eq(&e, "Ref") => {
                codelist_id = attribute(reader, &e, "id")?;
            }
            Event::End(e) if end_eq(&e, b"Enumeration") => break,
            Event::Eof => {
                return Err(Error::Parsing(ParseError::NotFound(
                    "closing tag for Enumeration".to_string(),
                )))
            }
            _ => {}
        }
        buf.clear();
    }
    Ok(codelist_id)
}

fn parse_codelist_element<T: BufRead>(reader: &mut Reader<T>, start: &BytesStart) -> Result<Codelist, Error> {
    let id = require_attribute(reader, start, "id")?;
    let version = attribute(reader, start, "version")?;

    let mut codes = HashMap::new();
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if local_eq(&e, "Code") => {
                let code = parse_code(reader, &e)?;
                codes.insert(code.id.clone(), code);
            }
            Event::End(e) if end_eq(&e, b"Codelist") => break,
            Event::Eof => {
                return Err(Error::Parsing(ParseError::NotFound(
                    "closing tag for Codelist".to_string(),
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(Codelist { id, version, codes })
}

fn parse_code<T: BufRead>(reader: &mut Reader<T>, start: &BytesStart) -> Result<Code, Error> {
    let id = require_attribute(reader, start, "id")?;

    let mut name = LangText::default();
    let mut description = LangText::default();

    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if local_eq(&e, "Name") => {
                let lang = attribute(reader, &e, "xml:lang")?;
                let text = read_text(reader, &e)?;
                name.offer(lang.as_deref(), text);
            }
            Event::Start(e) if local_eq(&e, "Description") => {
                let lang = attribute(reader, &e, "xml:lang")?;
                let text = read_text(reader, &e)?;
                description.offer(lang.as_deref(), text);
            }
            // parent links are intentionally not captured
            Event::Start(e) if local_eq(&e, "Parent") => skip_element(reader, &e)?,
            Event::End(e) if end_eq(&e, b"Code") => break,
            Event::Eof => {
                return Err(Error::Parsing(ParseError::NotFound(format!(
                    "closing tag for code {id}"
                ))))
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(Code {
        name: name.take().unwrap_or_else(|| id.clone()),
        id,
        description: description.take(),
        parent_id: None,
    })
}

/// Collects text content up to the closing tag of `start`.
fn read_text<T: BufRead>(reader: &mut Reader<T>, start: &BytesStart) -> Result<String, Error> {
    let element = start.local_name().as_ref().to_vec();
    let mut out = String::new();
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Text(text) => out.push_str(&text.unescape()?),
            Event::End(e) if end_eq(&e, &element) => break,
            Event::Eof => {
                return Err(Error::Parsing(ParseError::NotFound(format!(
                    "closing tag for {}",
                    String::from_utf8_lossy(&element)
                ))))
            }
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

fn skip_element<T: BufRead>(reader: &mut Reader<T>, start: &BytesStart) -> Result<(), Error> {
    let name = start.name().as_ref().to_vec();
    let mut buf = Vec::new();
    reader.read_to_end_into(QName(&name), &mut buf)?;
    Ok(())
}

fn local_eq(event: &BytesStart, name: &str) -> bool {
    event.local_name().as_ref() == name.as_bytes()
}

fn end_eq(event: &BytesEnd, name: impl AsRef<[u8]>) -> bool {
    event.local_name().as_ref() == name.as_ref()
}

fn attribute<T>(reader: &Reader<T>, event: &BytesStart, name: &str) -> Result<Option<String>, Error> {
    match event.try_get_attribute(name)? {
        Some(value) => {
            let value = value.decode_and_unescape_value(reader.decoder())?;
            Ok(Some(value.trim().to_string()))
        }
        None => Ok(None),
    }
}

fn require_attribute<T>(reader: &Reader<T>, event: &BytesStart, name: &str) -> Result<String, Error> {
    attribute(reader, event, name)?
        .ok_or_else(|| Error::Parsing(ParseError::NotFound(format!("attribute {name}"))))
}

/// Keeps the first english text seen, falling back to the first text in any
/// language when no english variant exists.
#[derive(Default)]
struct LangText {
    value: Option<String>,
    has_english: bool,
}

impl LangText {
    fn offer(&mut self, lang: Option<&str>, text: String) {
        if lang == Some("en") {
            if !self.has_english {
                self.value = Some(text);
                self.has_english = true;
            }
        }
        else if self.value.is_none() {
            self.value = Some(text);
        }
    }

    fn take(self) -> Option<String> {
        self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_xml(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    const DSD_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<mes:Structure xmlns:mes="http://www.sdmx.org/resources/sdmxml/schemas/v2_1/message"
               xmlns:str="http://www.sdmx.org/resources/sdmxml/schemas/v2_1/structure"
               xmlns:com="http://www.sdmx.org/resources/sdmxml/schemas/v2_1/common">
  <mes:Structures>
    <str:Dataflows>
      <str:Dataflow id="TPS00001" agencyID="ESTAT" version="1.0">
        <com:Name xml:lang="en">Test dataflow</com:Name>
        <str:Structure>
          <Ref id="TPS00001" agencyID="ESTAT" version="3.0" class="DataStructure"/>
        </str:Structure>
      </str:Dataflow>
    </str:Dataflows>
    <str:DataStructures>
      <str:DataStructure id="TPS00001" agencyID="ESTAT" version="3.0">
        <com:Name xml:lang="de">Teststruktur</com:Name>
        <com:Name xml:lang="en">Test structure</com:Name>
        <str:DataStructureComponents>
          <str:DimensionList id="DimensionDescriptor">
            <str:Dimension id="freq" position="1">
              <str:ConceptIdentity>
                <Ref id="freq" agencyID="ESTAT"/>
              </str:ConceptIdentity>
              <str:LocalRepresentation>
                <str:Enumeration>
                  <Ref id="CL_FREQ" agencyID="ESTAT" class="Codelist"/>
                </str:Enumeration>
              </str:LocalRepresentation>
            </str:Dimension>
            <str:Dimension id="geo" position="2">
              <str:LocalRepresentation>
                <str:Enumeration>
                  <Ref id="CL_GEO" agencyID="ESTAT" class="Codelist"/>
                </str:Enumeration>
              </str:LocalRepresentation>
            </str:Dimension>
            <str:TimeDimension id="TIME_PERIOD" position="3">
              <str:LocalRepresentation>
                <str:TextFormat textType="ObservationalTimePeriod"/>
              </str:LocalRepresentation>
            </str:TimeDimension>
          </str:DimensionList>
          <str:AttributeList id="AttributeDescriptor">
            <str:Attribute id="OBS_FLAG" assignmentStatus="Conditional">
              <str:LocalRepresentation>
                <str:Enumeration>
                  <Ref id="CL_OBS_FLAG" agencyID="ESTAT" class="Codelist"/>
                </str:Enumeration>
              </str:LocalRepresentation>
            </str:Attribute>
          </str:AttributeList>
          <str:MeasureList id="MeasureDescriptor">
            <str:PrimaryMeasure id="OBS_VALUE">
              <str:LocalRepresentation>
                <str:TextFormat textType="Double"/>
              </str:LocalRepresentation>
            </str:PrimaryMeasure>
          </str:MeasureList>
        </str:DataStructureComponents>
      </str:DataStructure>
    </str:DataStructures>
  </mes:Structures>
</mes:Structure>
"#;

    const CODELIST_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<mes:Structure xmlns:mes="http://www.sdmx.org/resources/sdmxml/schemas/v2_1/message"
               xmlns:str="http://www.sdmx.org/resources/sdmxml/schemas/v2_1/structure"
               xmlns:com="http://www.sdmx.org/resources/sdmxml/schemas/v2_1/common">
  <mes:Structures>
    <str:Codelists>
      <str:Codelist id="CL_GEO" agencyID="ESTAT" version="7.0">
        <com:Name xml:lang="en">Geopolitical entity</com:Name>
        <str:Code id="DE">
          <com:Name xml:lang="fr">Allemagne</com:Name>
          <com:Name xml:lang="en">Germany</com:Name>
          <com:Description xml:lang="en">Federal Republic of Germany</com:Description>
        </str:Code>
        <str:Code id="FR">
          <com:Name xml:lang="en">France</com:Name>
          <str:Parent>
            <Ref id="EU27_2020"/>
          </str:Parent>
        </str:Code>
      </str:Codelist>
    </str:Codelists>
  </mes:Structures>
</mes:Structure>
"#;

    #[test]
    fn parses_dsd_referenced_by_a_dataflow() {
        let file = write_xml(DSD_XML);
        let dsd = parse_dsd(file.path()).unwrap();

        assert_eq!(dsd.id, "TPS00001");
        assert_eq!(dsd.version, "3.0");
        assert_eq!(dsd.name.as_deref(), Some("Test structure"));

        assert_eq!(dsd.dimension_ids(), vec!["freq", "geo"]);
        assert_eq!(dsd.dimensions[0].codelist_id.as_deref(), Some("CL_FREQ"));
        assert_eq!(dsd.dimensions[1].codelist_id.as_deref(), Some("CL_GEO"));
        assert!(dsd.dimensions[0].position < dsd.dimensions[1].position);

        assert_eq!(dsd.attributes.len(), 1);
        assert_eq!(dsd.attributes[0].id, "OBS_FLAG");
        assert_eq!(dsd.flag_column(), "OBS_FLAG");

        assert_eq!(dsd.primary_measure_id, "OBS_VALUE");
        let measure = dsd.primary_measure().unwrap();
        assert_eq!(measure.data_type.as_deref(), Some("Double"));
    }

    #[test]
    fn time_dimension_is_not_a_stored_dimension() {
        let file = write_xml(DSD_XML);
        let dsd = parse_dsd(file.path()).unwrap();
        assert!(dsd.dimensions.iter().all(|d| d.id != "TIME_PERIOD"));
    }

    #[test]
    fn parses_codelist_with_english_names() {
        let file = write_xml(CODELIST_XML);
        let codelist = parse_codelist(file.path()).unwrap();

        assert_eq!(codelist.id, "CL_GEO");
        assert_eq!(codelist.version.as_deref(), Some("7.0"));
        assert_eq!(codelist.codes.len(), 2);

        let de = &codelist.codes["DE"];
        assert_eq!(de.name, "Germany");
        assert_eq!(de.description.as_deref(), Some("Federal Republic of Germany"));

        let fr = &codelist.codes["FR"];
        assert_eq!(fr.name, "France");
        assert_eq!(fr.description, None);
        assert_eq!(fr.parent_id, None);
    }

    #[test]
    fn wrong_document_kind_fails() {
        let file = write_xml(CODELIST_XML);
        assert!(matches!(parse_dsd(file.path()), Err(Error::Parsing(_))));

        let file = write_xml(DSD_XML);
        assert!(matches!(parse_codelist(file.path()), Err(Error::Parsing(_))));
    }

    #[test]
    fn empty_document_fails() {
        let file = write_xml("");
        assert!(parse_dsd(file.path()).is_err());
        assert!(parse_codelist(file.path()).is_err());
    }
}
