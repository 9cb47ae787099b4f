use crate::core::dataset::Sample;

pub const PIXELS_PER_IMAGE: usize = 1024;
pub const IMAGE_SIDE: usize = 32;
pub const NUM_CLASSES: usize = 28;

#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error("File exceeds maximum size of {limit_mb}MB")]
    SizeLimitExceeded { limit_mb: u64 },
    #[error("No files uploaded")]
    MissingInput,
    #[error("Only CSV files are supported")]
    UnsupportedFormat,
    #[error("Malformed data: {0}")]
    MalformedData(String),
    #[error("Non-numeric data detected in features: {0}")]
    NonNumericData(String),
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),
}

/// An uploaded table. The filename is optional because drawn or in-memory
/// inputs have no name; the extension check only applies when one is present.
#[derive(Clone, Debug)]
pub struct Upload {
    pub name: Option<String>,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new(name: Option<String>, bytes: Vec<u8>) -> Self {
        Upload { name, bytes }
    }

    pub fn from_path(path: &std::path::Path) -> std::io::Result<Self> {
        let bytes = std::fs::read(path)?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());
        Ok(Upload { name, bytes })
    }
}

/// Validate the features and labels tables and shape them into samples.
///
/// Features must be a headerless table of exactly 1024 numeric columns,
/// labels a headerless single integer column in [1,28] with one row per
/// feature row. On success every sample carries 1024 pixels scaled into
/// [0,1] and a zero-indexed label. All checks run before any value is
/// transformed, so a failure never produces partial output.
pub fn load(
    features: Option<&Upload>,
    labels: Option<&Upload>,
    max_upload_bytes: u64,
) -> Result<Vec<Sample>, DataError> {
    let (features, labels) = match (features, labels) {
        (Some(features), Some(labels)) => (features, labels),
        _ => return Err(DataError::MissingInput),
    };

    for upload in [features, labels] {
        if upload.bytes.len() as u64 > max_upload_bytes {
            return Err(DataError::SizeLimitExceeded {
                limit_mb: max_upload_bytes / (1024 * 1024),
            });
        }
    }

    for upload in [features, labels] {
        if let Some(name) = &upload.name {
            if !name.ends_with(".csv") {
                return Err(DataError::UnsupportedFormat);
            }
        }
    }

    let feature_rows = read_table(&features.bytes)?;
    let label_rows = read_table(&labels.bytes)?;

    let pixels = parse_features(&feature_rows)?;
    let raw_labels = parse_labels(&label_rows)?;

    if pixels.len() != raw_labels.len() {
        return Err(DataError::ShapeMismatch(format!(
            "Mismatched samples: {} features vs {} labels",
            pixels.len(),
            raw_labels.len()
        )));
    }

    // Validation is complete; shape the output in one pass.
    let samples = pixels
        .into_iter()
        .zip(raw_labels)
        .map(|(row, label)| Sample {
            pixels: row.into_iter().map(|value| value / 255.0).collect(),
            label: label - 1,
        })
        .collect();

    Ok(samples)
}

fn read_table(bytes: &[u8]) -> Result<Vec<Vec<String>>, DataError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_reader(bytes);

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|err| DataError::MalformedData(err.to_string()))?;
        rows.push(record.iter().map(|field| field.to_string()).collect());
    }

    if rows.is_empty() {
        return Err(DataError::MalformedData(
            "Uploaded CSV files are empty".to_string(),
        ));
    }

    Ok(rows)
}

fn parse_features(rows: &[Vec<String>]) -> Result<Vec<Vec<f32>>, DataError> {
    let mut parsed = Vec::with_capacity(rows.len());

    for (row_index, row) in rows.iter().enumerate() {
        let mut values = Vec::with_capacity(row.len());
        for field in row {
            let value: f32 = field.trim().parse().map_err(|_| {
                DataError::NonNumericData(format!("row {}, value \"{}\"", row_index, field))
            })?;
            values.push(value);
        }
        parsed.push(values);
    }

    let width = parsed[0].len();
    if width != PIXELS_PER_IMAGE {
        return Err(DataError::ShapeMismatch(format!(
            "Expected {} features, got {}",
            PIXELS_PER_IMAGE, width
        )));
    }

    Ok(parsed)
}

fn parse_labels(rows: &[Vec<String>]) -> Result<Vec<i64>, DataError> {
    let mut labels = Vec::with_capacity(rows.len());

    for (row_index, row) in rows.iter().enumerate() {
        if row.len() != 1 {
            return Err(DataError::MalformedData(format!(
                "Labels must be a single column, row {} has {} values",
                row_index,
                row.len()
            )));
        }

        let value: f64 = row[0].trim().parse().map_err(|_| {
            DataError::MalformedData(format!(
                "Label at row {} is not a number: \"{}\"",
                row_index, row[0]
            ))
        })?;

        if value.fract() != 0.0 {
            return Err(DataError::MalformedData(format!(
                "Label at row {} is not an integer: {}",
                row_index, value
            )));
        }

        let label = value as i64;
        if !(1..=NUM_CLASSES as i64).contains(&label) {
            return Err(DataError::MalformedData(format!(
                "Label at row {} is out of range [1,{}]: {}",
                row_index, NUM_CLASSES, label
            )));
        }

        labels.push(label);
    }

    Ok(labels)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn csv_upload(name: &str, content: String) -> Upload {
        Upload::new(Some(name.to_string()), content.into_bytes())
    }

    fn features_csv(rows: usize, columns: usize) -> Upload {
        let line = vec!["0"; columns].join(",");
        let content = vec![line; rows].join("\n");
        csv_upload("features.csv", content)
    }

    fn labels_csv(values: &[i64]) -> Upload {
        let content = values
            .iter()
            .map(|value| value.to_string())
            .collect::<Vec<_>>()
            .join("\n");
        csv_upload("labels.csv", content)
    }

    const LIMIT: u64 = 10 * 1024 * 1024;

    #[test]
    fn test_zero_features_produce_zero_tensor_and_label_zero() {
        let samples = load(
            Some(&features_csv(1, 1024)),
            Some(&labels_csv(&[1])),
            LIMIT,
        )
        .expect("load failed");

        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].pixels.len(), 1024);
        assert!(samples[0].pixels.iter().all(|&value| value == 0.0));
        assert_eq!(samples[0].label, 0);
    }

    #[test]
    fn test_values_normalized_into_unit_interval() {
        let line = (0..1024).map(|_| "255").collect::<Vec<_>>().join(",");
        let samples = load(
            Some(&csv_upload("features.csv", line)),
            Some(&labels_csv(&[28])),
            LIMIT,
        )
        .expect("load failed");

        assert!(samples[0].pixels.iter().all(|&value| value == 1.0));
        assert_eq!(samples[0].label, 27);
    }

    #[test]
    fn test_labels_shift_is_bijective_over_full_range() {
        let labels: Vec<i64> = (1..=28).collect();
        let samples = load(
            Some(&features_csv(28, 1024)),
            Some(&labels_csv(&labels)),
            LIMIT,
        )
        .expect("load failed");

        let shifted: Vec<i64> = samples.iter().map(|sample| sample.label).collect();
        let expected: Vec<i64> = (0..28).collect();
        assert_eq!(shifted, expected);
    }

    #[test]
    fn test_missing_input_is_rejected() {
        let features = features_csv(1, 1024);
        let result = load(Some(&features), None, LIMIT);
        assert!(matches!(result, Err(DataError::MissingInput)));

        let labels = labels_csv(&[1]);
        let result = load(None, Some(&labels), LIMIT);
        assert!(matches!(result, Err(DataError::MissingInput)));
    }

    #[test]
    fn test_size_limit_is_enforced() {
        let features = features_csv(1, 1024);
        let labels = labels_csv(&[1]);
        let result = load(Some(&features), Some(&labels), 16);
        assert!(matches!(
            result,
            Err(DataError::SizeLimitExceeded { limit_mb: 0 })
        ));
    }

    #[test]
    fn test_non_csv_extension_is_rejected() {
        let features = csv_upload("features.txt", "0".to_string());
        let labels = labels_csv(&[1]);
        let result = load(Some(&features), Some(&labels), LIMIT);
        assert!(matches!(result, Err(DataError::UnsupportedFormat)));
    }

    #[test]
    fn test_unnamed_upload_skips_extension_check() {
        let line = vec!["0"; 1024].join(",");
        let features = Upload::new(None, line.into_bytes());
        let labels = Upload::new(None, b"1".to_vec());
        let samples = load(Some(&features), Some(&labels), LIMIT).expect("load failed");
        assert_eq!(samples.len(), 1);
    }

    #[test]
    fn test_empty_table_is_malformed() {
        let features = csv_upload("features.csv", String::new());
        let labels = labels_csv(&[1]);
        let result = load(Some(&features), Some(&labels), LIMIT);
        assert!(matches!(result, Err(DataError::MalformedData(_))));
    }

    #[test]
    fn test_non_numeric_feature_is_detected() {
        let mut fields = vec!["0"; 1024];
        fields[5] = "abc";
        let features = csv_upload("features.csv", fields.join(","));
        let labels = labels_csv(&[1]);
        let result = load(Some(&features), Some(&labels), LIMIT);
        assert!(matches!(result, Err(DataError::NonNumericData(_))));
    }

    #[test]
    fn test_wrong_column_count_is_shape_mismatch() {
        let features = features_csv(1, 1023);
        let labels = labels_csv(&[1]);
        let result = load(Some(&features), Some(&labels), LIMIT);
        assert!(matches!(result, Err(DataError::ShapeMismatch(_))));
    }

    #[test]
    fn test_mismatched_row_counts_is_shape_mismatch() {
        let features = features_csv(5, 1024);
        let labels = labels_csv(&[1, 2, 3]);
        let result = load(Some(&features), Some(&labels), LIMIT);
        assert!(matches!(result, Err(DataError::ShapeMismatch(_))));
    }

    #[test]
    fn test_out_of_range_label_is_rejected() {
        let features = features_csv(1, 1024);
        let labels = labels_csv(&[29]);
        let result = load(Some(&features), Some(&labels), LIMIT);
        assert!(matches!(result, Err(DataError::MalformedData(_))));

        let labels = labels_csv(&[0]);
        let result = load(Some(&features_csv(1, 1024)), Some(&labels), LIMIT);
        assert!(matches!(result, Err(DataError::MalformedData(_))));
    }
}
