use snafu::Snafu;

use crate::structure_set::RoiSelector;

#[derive(Debug, Clone, PartialEq, Snafu)]
#[snafu(visibility(pub))]
pub enum RoiError {
    #[snafu(display("ROI {} not found in structure set", selector))]
    RoiNotFound { selector: RoiSelector },

    #[snafu(display("ROI name '{}' is shared by ROIs {:?}", name, numbers))]
    AmbiguousRoiName { name: String, numbers: Vec<i32> },

    #[snafu(display(
        "slice {} has no pixel spacing and the default spacing is disabled",
        slice
    ))]
    MissingPixelSpacing { slice: usize },
}
