//! Static IPTC-IIM dataset definitions, keyed by (record number, dataset
//! number). Names follow https://exiftool.org/TagNames/IPTC.html

use std::collections::HashMap;

use once_cell::sync::Lazy;

/// Wire format of a dataset's payload. IPTC is always big-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IptcFormat {
    Str,
    Short,
    Long,
    Byte,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct IptcField {
    pub(crate) name: &'static str,
    pub(crate) format: IptcFormat,
    pub(crate) repeatable: bool,
}

pub(crate) fn lookup(record: u8, dataset: u8) -> Option<IptcField> {
    FIELDS.get(&(record, dataset)).copied()
}

/// Record-section name for a record number.
pub(crate) fn record_name(record: u8) -> String {
    match record {
        1 => "IPTCEnvelope".to_string(),
        2 => "IPTCApplication".to_string(),
        3 => "IPTCNewsPhoto".to_string(),
        7 => "IPTCPreObjectData".to_string(),
        8 => "IPTCObjectData".to_string(),
        9 => "IPTCPostObjectData".to_string(),
        240 => "IPTCFotoStation".to_string(),
        other => format!("IPTCUnknownRecord{other}"),
    }
}

static FIELDS: Lazy<HashMap<(u8, u8), IptcField>> = Lazy::new(|| {
    FIELD_DEFS
        .iter()
        .map(|&(record, id, name, format, repeatable)| {
            (
                (record, id),
                IptcField {
                    name,
                    format,
                    repeatable,
                },
            )
        })
        .collect()
});

use IptcFormat::{Byte, Long, Short, Str};

#[rustfmt::skip]
const FIELD_DEFS: &[(u8, u8, &str, IptcFormat, bool)] = &[
    // Record 1: envelope.
    (1, 0,   "EnvelopeRecordVersion", Short, false),
    (1, 5,   "Destination",           Str,   true),
    (1, 20,  "FileFormat",            Short, false),
    (1, 22,  "FileVersion",           Short, false),
    (1, 30,  "ServiceIdentifier",     Str,   false),
    (1, 40,  "EnvelopeNumber",        Str,   false),
    (1, 50,  "ProductID",             Str,   true),
    (1, 60,  "EnvelopePriority",      Str,   false),
    (1, 70,  "DateSent",              Str,   false),
    (1, 80,  "TimeSent",              Str,   false),
    (1, 90,  "CodedCharacterSet",     Str,   false),
    (1, 100, "UniqueObjectName",      Str,   false),
    (1, 120, "ARMIdentifier",         Short, false),
    (1, 122, "ARMVersion",            Short, false),
    // Record 2: application.
    (2, 0,   "ApplicationRecordVersion",       Short, false),
    (2, 3,   "ObjectTypeReference",            Str,   false),
    (2, 4,   "ObjectAttributeReference",       Str,   true),
    (2, 5,   "ObjectName",                     Str,   false),
    (2, 7,   "EditStatus",                     Str,   false),
    (2, 8,   "EditorialUpdate",                Str,   false),
    (2, 10,  "Urgency",                        Str,   false),
    (2, 12,  "SubjectReference",               Str,   true),
    (2, 15,  "Category",                       Str,   false),
    (2, 20,  "SupplementalCategories",         Str,   true),
    (2, 22,  "FixtureIdentifier",              Str,   false),
    (2, 25,  "Keywords",                       Str,   true),
    (2, 26,  "ContentLocationCode",            Str,   true),
    (2, 27,  "ContentLocationName",            Str,   true),
    (2, 30,  "ReleaseDate",                    Str,   false),
    (2, 35,  "ReleaseTime",                    Str,   false),
    (2, 37,  "ExpirationDate",                 Str,   false),
    (2, 38,  "ExpirationTime",                 Str,   false),
    (2, 40,  "SpecialInstructions",            Str,   false),
    (2, 42,  "ActionAdvised",                  Str,   false),
    (2, 45,  "ReferenceService",               Str,   true),
    (2, 47,  "ReferenceDate",                  Str,   true),
    (2, 50,  "ReferenceNumber",                Str,   true),
    (2, 55,  "DateCreated",                    Str,   false),
    (2, 60,  "TimeCreated",                    Str,   false),
    (2, 62,  "DigitalCreationDate",            Str,   false),
    (2, 63,  "DigitalCreationTime",            Str,   false),
    (2, 65,  "OriginatingProgram",             Str,   false),
    (2, 70,  "ProgramVersion",                 Str,   false),
    (2, 75,  "ObjectCycle",                    Str,   false),
    (2, 80,  "By-line",                        Str,   true),
    (2, 85,  "By-lineTitle",                   Str,   true),
    (2, 90,  "City",                           Str,   false),
    (2, 92,  "Sub-location",                   Str,   false),
    (2, 95,  "Province-State",                 Str,   false),
    (2, 100, "Country-PrimaryLocationCode",    Str,   false),
    (2, 101, "Country-PrimaryLocationName",    Str,   false),
    (2, 103, "OriginalTransmissionReference",  Str,   false),
    (2, 105, "Headline",                       Str,   false),
    (2, 110, "Credit",                         Str,   false),
    (2, 115, "Source",                         Str,   false),
    (2, 116, "CopyrightNotice",                Str,   false),
    (2, 118, "Contact",                        Str,   true),
    (2, 120, "Caption-Abstract",               Str,   false),
    (2, 121, "LocalCaption",                   Str,   false),
    (2, 122, "Writer-Editor",                  Str,   true),
    (2, 130, "ImageType",                      Str,   false),
    (2, 131, "ImageOrientation",               Str,   false),
    (2, 135, "LanguageIdentifier",             Str,   false),
    (2, 150, "AudioType",                      Str,   false),
    (2, 151, "AudioSamplingRate",              Str,   false),
    (2, 152, "AudioSamplingResolution",        Str,   false),
    (2, 153, "AudioDuration",                  Str,   false),
    (2, 154, "AudioOutcue",                    Str,   false),
    (2, 184, "JobID",                          Str,   false),
    (2, 185, "MasterDocumentID",               Str,   false),
    (2, 186, "ShortDocumentID",                Str,   false),
    (2, 187, "UniqueDocumentID",               Str,   false),
    (2, 188, "OwnerID",                        Str,   false),
    (2, 200, "ObjectPreviewFileFormat",        Short, false),
    (2, 201, "ObjectPreviewFileVersion",       Short, false),
    (2, 221, "Prefs",                          Str,   false),
    (2, 225, "ClassifyState",                  Str,   false),
    (2, 228, "SimilarityIndex",                Str,   false),
    (2, 230, "DocumentNotes",                  Str,   false),
    (2, 231, "DocumentHistory",                Str,   false),
    (2, 232, "ExifCameraInfo",                 Str,   false),
    (2, 255, "CatalogSets",                    Str,   true),
    // Record 3: news photo.
    (3, 0,   "NewsPhotoVersion",       Short, false),
    // Records 7..9: object data envelope.
    (7, 10,  "SizeMode",              Byte,  false),
    (7, 20,  "MaxSubfileSize",        Long,  false),
    (7, 90,  "ObjectSizeAnnounced",   Long,  false),
    (7, 95,  "MaximumObjectSize",     Long,  false),
    (8, 10,  "SubFile",               Str,   true),
    (9, 10,  "ConfirmedObjectSize",   Long,  false),
];
