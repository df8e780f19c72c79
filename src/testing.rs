//! Builders for synthetic DICOM objects used across the unit tests.

use dicom::core::value::DataSetSequence;
use dicom::core::{DataElement, PrimitiveValue, VR};
use dicom::dictionary_std::{tags, uids};
use dicom::object::{FileDicomObject, FileMetaTableBuilder, InMemDicomObject};

use crate::structure_set::Contour;

fn decimal_strings(values: &[f64]) -> PrimitiveValue {
    let values: Vec<String> = values.iter().map(|v| v.to_string()).collect();
    PrimitiveValue::Strs(values.into())
}

fn file_object(
    dcm: InMemDicomObject,
    sop_class_uid: &str,
    sop_instance_uid: &str,
) -> FileDicomObject<InMemDicomObject> {
    dcm.with_meta(
        FileMetaTableBuilder::new()
            .transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN)
            .media_storage_sop_class_uid(sop_class_uid)
            .media_storage_sop_instance_uid(sop_instance_uid),
    )
    .unwrap()
}

/// A single-frame signed 16-bit CT image
pub(crate) fn ct_file(
    rows: u16,
    cols: u16,
    position: [f64; 3],
    spacing: Option<[f64; 2]>,
    instance_number: Option<i32>,
    pixels: &[i16],
) -> FileDicomObject<InMemDicomObject> {
    assert_eq!(pixels.len(), rows as usize * cols as usize);
    let mut dcm = InMemDicomObject::from_element_iter([
        DataElement::new(tags::MODALITY, VR::CS, PrimitiveValue::from("CT")),
        DataElement::new(tags::SAMPLES_PER_PIXEL, VR::US, PrimitiveValue::from(1_u16)),
        DataElement::new(
            tags::PHOTOMETRIC_INTERPRETATION,
            VR::CS,
            PrimitiveValue::from("MONOCHROME2"),
        ),
        DataElement::new(tags::ROWS, VR::US, PrimitiveValue::from(rows)),
        DataElement::new(tags::COLUMNS, VR::US, PrimitiveValue::from(cols)),
        DataElement::new(tags::BITS_ALLOCATED, VR::US, PrimitiveValue::from(16_u16)),
        DataElement::new(tags::BITS_STORED, VR::US, PrimitiveValue::from(16_u16)),
        DataElement::new(tags::HIGH_BIT, VR::US, PrimitiveValue::from(15_u16)),
        DataElement::new(tags::PIXEL_REPRESENTATION, VR::US, PrimitiveValue::from(1_u16)),
        DataElement::new(
            tags::IMAGE_POSITION_PATIENT,
            VR::DS,
            decimal_strings(&position),
        ),
    ]);
    if let Some(spacing) = spacing {
        dcm.put(DataElement::new(
            tags::PIXEL_SPACING,
            VR::DS,
            decimal_strings(&spacing),
        ));
    }
    if let Some(instance_number) = instance_number {
        dcm.put(DataElement::new(
            tags::INSTANCE_NUMBER,
            VR::IS,
            PrimitiveValue::from(instance_number.to_string()),
        ));
    }
    let words: Vec<u16> = pixels.iter().map(|v| *v as u16).collect();
    dcm.put(DataElement::new(
        tags::PIXEL_DATA,
        VR::OW,
        PrimitiveValue::U16(words.into()),
    ));

    let instance_uid = format!("1.2.826.0.1.3680043.2.1125.{}", instance_number.unwrap_or(0));
    file_object(dcm, uids::CT_IMAGE_STORAGE, &instance_uid)
}

/// An axis-aligned square contour with its lower corner at (x, y)
pub(crate) fn square(x: f64, y: f64, z: f64, size: f64) -> Contour {
    Contour::new(vec![
        [x, y, z],
        [x + size, y, z],
        [x + size, y + size, z],
        [x, y + size, z],
    ])
}

/// An RT Structure Set object with the given ROI definitions and per-ROI contours
pub(crate) fn rtstruct_object(rois: &[(i32, &str)], contours: &[(i32, Vec<Contour>)]) -> InMemDicomObject {
    let roi_items: Vec<InMemDicomObject> = rois
        .iter()
        .map(|(number, name)| {
            InMemDicomObject::from_element_iter([
                DataElement::new(tags::ROI_NUMBER, VR::IS, PrimitiveValue::from(number.to_string())),
                DataElement::new(tags::ROI_NAME, VR::LO, PrimitiveValue::from(*name)),
            ])
        })
        .collect();

    let contour_items: Vec<InMemDicomObject> = contours
        .iter()
        .map(|(number, contours)| {
            let items: Vec<InMemDicomObject> = contours
                .iter()
                .map(|contour| {
                    let values: Vec<f64> = contour.points().iter().flatten().copied().collect();
                    InMemDicomObject::from_element_iter([
                        DataElement::new(
                            tags::CONTOUR_GEOMETRIC_TYPE,
                            VR::CS,
                            PrimitiveValue::from("CLOSED_PLANAR"),
                        ),
                        DataElement::new(
                            tags::NUMBER_OF_CONTOUR_POINTS,
                            VR::IS,
                            PrimitiveValue::from(contour.len().to_string()),
                        ),
                        DataElement::new(tags::CONTOUR_DATA, VR::DS, decimal_strings(&values)),
                    ])
                })
                .collect();
            InMemDicomObject::from_element_iter([
                DataElement::new(
                    tags::REFERENCED_ROI_NUMBER,
                    VR::IS,
                    PrimitiveValue::from(number.to_string()),
                ),
                DataElement::new(tags::CONTOUR_SEQUENCE, VR::SQ, DataSetSequence::from(items)),
            ])
        })
        .collect();

    InMemDicomObject::from_element_iter([
        DataElement::new(tags::MODALITY, VR::CS, PrimitiveValue::from("RTSTRUCT")),
        DataElement::new(
            tags::STRUCTURE_SET_ROI_SEQUENCE,
            VR::SQ,
            DataSetSequence::from(roi_items),
        ),
        DataElement::new(
            tags::ROI_CONTOUR_SEQUENCE,
            VR::SQ,
            DataSetSequence::from(contour_items),
        ),
    ])
}

/// [`rtstruct_object`] wrapped with a file meta group, ready to be written to disk
pub(crate) fn rtstruct_file(
    rois: &[(i32, &str)],
    contours: &[(i32, Vec<Contour>)],
) -> FileDicomObject<InMemDicomObject> {
    file_object(
        rtstruct_object(rois, contours),
        uids::RT_STRUCTURE_SET_STORAGE,
        "1.2.826.0.1.3680043.2.1125.999",
    )
}
