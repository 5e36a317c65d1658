#![allow(dead_code)]
//! Delta tables written to temporary directories for the scan tests.
//!
//! A [`TestTable`] writes real commit files, parquet data files, inline
//! deletion vectors and parquet checkpoints, so the tests exercise the same
//! code paths as tables produced by other writers.
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow_array::RecordBatch;
use arrow_json::ReaderBuilder;
use arrow_schema::{DataType, Field, Fields, Schema, SchemaRef};
use deltalake_scan::kernel::deletion_vector::encode_bitmap_array;
use parquet::arrow::ArrowWriter;
use roaring::RoaringTreemap;
use serde_json::{json, Value};
use tempfile::TempDir;

pub mod utils;

pub use utils::*;

/// Column of a [`TestTable`].
#[derive(Debug, Clone)]
pub struct TestColumn {
    pub name: String,
    /// Delta primitive type name, e.g. `long` or `string`.
    pub delta_type: String,
    /// Name of the column in the data files.
    pub physical_name: String,
}

#[derive(Debug, Default)]
pub struct TestTableBuilder {
    columns: Vec<(String, String)>,
    partition_columns: Vec<String>,
    column_mapping: bool,
}

impl TestTableBuilder {
    pub fn with_column(mut self, name: &str, delta_type: &str) -> Self {
        self.columns.push((name.to_string(), delta_type.to_string()));
        self
    }

    pub fn with_partition_columns(mut self, columns: &[&str]) -> Self {
        self.partition_columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Store columns under physical names that differ from their logical names.
    pub fn with_column_mapping(mut self) -> Self {
        self.column_mapping = true;
        self
    }

    /// Create the table directory and write commit 0.
    pub fn create(self) -> TestResult<TestTable> {
        let dir = tempfile::tempdir()?;
        fs::create_dir_all(dir.path().join("_delta_log"))?;

        let columns: Vec<_> = self
            .columns
            .into_iter()
            .enumerate()
            .map(|(idx, (name, delta_type))| TestColumn {
                physical_name: if self.column_mapping {
                    format!("col-{idx}-{}", name.to_ascii_lowercase())
                } else {
                    name.clone()
                },
                name,
                delta_type,
            })
            .collect();

        let fields: Vec<Value> = columns
            .iter()
            .enumerate()
            .map(|(idx, c)| {
                let metadata = if self.column_mapping {
                    json!({
                        "delta.columnMapping.id": idx + 1,
                        "delta.columnMapping.physicalName": c.physical_name,
                    })
                } else {
                    json!({})
                };
                json!({
                    "name": c.name,
                    "type": c.delta_type,
                    "nullable": true,
                    "metadata": metadata,
                })
            })
            .collect();
        let schema_string = json!({ "type": "struct", "fields": fields }).to_string();

        let mut features = vec!["deletionVectors"];
        let mut configuration = json!({ "delta.enableDeletionVectors": "true" });
        if self.column_mapping {
            features.push("columnMapping");
            configuration["delta.columnMapping.mode"] = json!("name");
            configuration["delta.columnMapping.maxColumnId"] = json!(columns.len().to_string());
        }
        let protocol = json!({
            "minReaderVersion": 3,
            "minWriterVersion": 7,
            "readerFeatures": features.clone(),
            "writerFeatures": features,
        });
        let metadata = json!({
            "id": "5fba94ed-9794-4965-ba6e-6ee3c0d22af9",
            "format": { "provider": "parquet", "options": {} },
            "schemaString": schema_string,
            "partitionColumns": self.partition_columns,
            "createdTime": now_millis(),
            "configuration": configuration,
        });

        let mut table = TestTable {
            dir,
            columns,
            partition_columns: self.partition_columns,
            protocol: protocol.clone(),
            metadata: metadata.clone(),
            version: -1,
            active: BTreeMap::new(),
            deleted: HashMap::new(),
        };
        table.commit(vec![
            json!({ "protocol": protocol }),
            json!({ "metaData": metadata }),
        ])?;
        Ok(table)
    }
}

/// A Delta table in a temporary directory, removed on drop.
pub struct TestTable {
    dir: TempDir,
    columns: Vec<TestColumn>,
    partition_columns: Vec<String>,
    protocol: Value,
    metadata: Value,
    version: i64,
    /// `add` actions of the files in the latest version, by path
    active: BTreeMap<String, Value>,
    deleted: HashMap<String, RoaringTreemap>,
}

impl TestTable {
    pub fn builder() -> TestTableBuilder {
        TestTableBuilder::default()
    }

    /// Table with the columns `id: long` and `value: string`.
    pub fn simple() -> TestResult<Self> {
        Self::builder()
            .with_column("id", "long")
            .with_column("value", "string")
            .create()
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Location of the table as a local path string.
    pub fn uri(&self) -> String {
        self.dir.path().to_string_lossy().into_owned()
    }

    pub fn log_dir(&self) -> PathBuf {
        self.dir.path().join("_delta_log")
    }

    /// Latest committed version.
    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn columns(&self) -> &[TestColumn] {
        &self.columns
    }

    /// Paths of the files in the latest version.
    pub fn active_files(&self) -> Vec<String> {
        self.active.keys().cloned().collect()
    }

    /// Write `batch` as a parquet file and return the `add` action for it.
    ///
    /// `batch` uses logical column names and must not contain partition columns.
    pub fn write_file(
        &self,
        path: &str,
        batch: &RecordBatch,
        partition_values: &[(&str, Option<&str>)],
    ) -> TestResult<Value> {
        let physical = self.to_physical(batch)?;
        let location = self.dir.path().join(path);
        if let Some(parent) = location.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(&location)?;
        let mut writer = ArrowWriter::try_new(file, physical.schema(), None)?;
        writer.write(&physical)?;
        writer.close()?;
        let size = fs::metadata(&location)?.len();

        let partition_values: serde_json::Map<String, Value> = partition_values
            .iter()
            .map(|(k, v)| (k.to_string(), json!(v)))
            .collect();
        Ok(json!({
            "add": {
                "path": path,
                "partitionValues": partition_values,
                "size": size,
                "modificationTime": now_millis(),
                "dataChange": true,
                "stats": json!({ "numRecords": batch.num_rows() }).to_string(),
            }
        }))
    }

    /// Write `batch` and commit it as a new file.
    pub fn append(
        &mut self,
        path: &str,
        batch: &RecordBatch,
        partition_values: &[(&str, Option<&str>)],
    ) -> TestResult<i64> {
        let add = self.write_file(path, batch, partition_values)?;
        self.commit(vec![add])
    }

    /// Commit `actions` as the next version.
    pub fn commit(&mut self, actions: Vec<Value>) -> TestResult<i64> {
        let version = self.version + 1;
        let mut lines = vec![json!({
            "commitInfo": {
                "timestamp": now_millis(),
                "operation": "WRITE",
                "operationParameters": { "mode": "Append" },
            }
        })
        .to_string()];
        for action in &actions {
            if let Some(add) = action.get("add") {
                let path = string_field(add, "path")?;
                self.active.insert(path, add.clone());
            } else if let Some(remove) = action.get("remove") {
                let path = string_field(remove, "path")?;
                self.active.remove(&path);
            }
            lines.push(action.to_string());
        }
        let log_file = self.log_dir().join(format!("{version:020}.json"));
        fs::write(log_file, lines.join("\n"))?;
        self.version = version;
        Ok(version)
    }

    /// Commit the removal of the file at `path`.
    pub fn remove(&mut self, path: &str) -> TestResult<i64> {
        let remove = self.remove_action(path)?;
        self.deleted.remove(path);
        self.commit(vec![remove])
    }

    /// Mark `rows` of the file at `path` deleted with an inline deletion vector.
    ///
    /// Rows deleted by earlier calls stay deleted.
    pub fn delete_rows(&mut self, path: &str, rows: &[u64]) -> TestResult<i64> {
        let remove = self.remove_action(path)?;
        let mut add = remove["remove"].clone();
        let deleted = self.deleted.entry(path.to_string()).or_default();
        deleted.extend(rows.iter().copied());
        add["deletionVector"] = inline_deletion_vector(deleted)?;
        add["dataChange"] = json!(true);
        add["modificationTime"] = json!(now_millis());
        if let Some(obj) = add.as_object_mut() {
            obj.remove("deletionTimestamp");
        }
        if let Some(stats) = self.active.get(path).and_then(|a| a.get("stats")) {
            add["stats"] = stats.clone();
        }
        self.commit(vec![remove, json!({ "add": add })])
    }

    fn remove_action(&self, path: &str) -> TestResult<Value> {
        let add = self
            .active
            .get(path)
            .ok_or_else(|| format!("file {path} is not part of the table"))?;
        let mut remove = json!({
            "path": path,
            "deletionTimestamp": now_millis(),
            "dataChange": true,
            "partitionValues": add["partitionValues"],
            "size": add["size"],
        });
        if let Some(dv) = add.get("deletionVector") {
            remove["deletionVector"] = dv.clone();
        }
        Ok(json!({ "remove": remove }))
    }

    /// Write a single part parquet checkpoint of the latest version.
    pub fn checkpoint(&self) -> TestResult<PathBuf> {
        let mut lines = vec![
            json!({ "protocol": self.protocol }).to_string(),
            json!({ "metaData": self.metadata }).to_string(),
        ];
        lines.extend(self.active.values().map(|add| json!({ "add": add }).to_string()));

        let schema = checkpoint_schema();
        let reader = ReaderBuilder::new(schema.clone()).build(Cursor::new(lines.join("\n")))?;
        let location = self
            .log_dir()
            .join(format!("{:020}.checkpoint.parquet", self.version));
        let mut writer = ArrowWriter::try_new(File::create(&location)?, schema, None)?;
        let mut rows = 0;
        for batch in reader {
            let batch = batch?;
            rows += batch.num_rows();
            writer.write(&batch)?;
        }
        writer.close()?;
        fs::write(
            self.log_dir().join("_last_checkpoint"),
            json!({ "version": self.version, "size": rows }).to_string(),
        )?;
        Ok(location)
    }

    /// Delete the commit file of `version`, like log cleanup does.
    pub fn remove_commit(&self, version: i64) -> TestResult<()> {
        fs::remove_file(self.log_dir().join(format!("{version:020}.json")))?;
        Ok(())
    }

    fn to_physical(&self, batch: &RecordBatch) -> TestResult<RecordBatch> {
        let fields: Fields = batch
            .schema()
            .fields()
            .iter()
            .map(|field| {
                if self.partition_columns.contains(field.name()) {
                    return Err(format!("partition column {} in data file", field.name()));
                }
                let column = self
                    .columns
                    .iter()
                    .find(|c| &c.name == field.name())
                    .ok_or_else(|| format!("unknown column {}", field.name()))?;
                Ok(Arc::new(field.as_ref().clone().with_name(&column.physical_name)))
            })
            .collect::<Result<_, String>>()?;
        Ok(RecordBatch::try_new(
            Arc::new(Schema::new(fields)),
            batch.columns().to_vec(),
        )?)
    }
}

/// Inline deletion vector descriptor hiding `deleted`.
pub fn inline_deletion_vector(deleted: &RoaringTreemap) -> TestResult<Value> {
    let mut bytes = encode_bitmap_array(deleted)?;
    let size = bytes.len();
    // z85 works on four byte groups
    bytes.resize(size.div_ceil(4) * 4, 0);
    Ok(json!({
        "storageType": "i",
        "pathOrInlineDv": z85::encode(&bytes),
        "sizeInBytes": size,
        "cardinality": deleted.len(),
    }))
}

fn string_field(action: &Value, key: &str) -> TestResult<String> {
    action
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| format!("action without {key}: {action}").into())
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn string_map() -> DataType {
    DataType::Map(
        Arc::new(Field::new(
            "key_value",
            DataType::Struct(Fields::from(vec![
                Field::new("key", DataType::Utf8, false),
                Field::new("value", DataType::Utf8, true),
            ])),
            false,
        )),
        false,
    )
}

fn string_list() -> DataType {
    DataType::List(Arc::new(Field::new("element", DataType::Utf8, true)))
}

/// Checkpoint schema covering the actions a [`TestTable`] writes.
fn checkpoint_schema() -> SchemaRef {
    let protocol = Fields::from(vec![
        Field::new("minReaderVersion", DataType::Int32, true),
        Field::new("minWriterVersion", DataType::Int32, true),
        Field::new("readerFeatures", string_list(), true),
        Field::new("writerFeatures", string_list(), true),
    ]);
    let format = Fields::from(vec![
        Field::new("provider", DataType::Utf8, true),
        Field::new("options", string_map(), true),
    ]);
    let metadata = Fields::from(vec![
        Field::new("id", DataType::Utf8, true),
        Field::new("format", DataType::Struct(format), true),
        Field::new("schemaString", DataType::Utf8, true),
        Field::new("partitionColumns", string_list(), true),
        Field::new("createdTime", DataType::Int64, true),
        Field::new("configuration", string_map(), true),
    ]);
    let deletion_vector = Fields::from(vec![
        Field::new("storageType", DataType::Utf8, true),
        Field::new("pathOrInlineDv", DataType::Utf8, true),
        Field::new("offset", DataType::Int32, true),
        Field::new("sizeInBytes", DataType::Int32, true),
        Field::new("cardinality", DataType::Int64, true),
    ]);
    let add = Fields::from(vec![
        Field::new("path", DataType::Utf8, true),
        Field::new("partitionValues", string_map(), true),
        Field::new("size", DataType::Int64, true),
        Field::new("modificationTime", DataType::Int64, true),
        Field::new("dataChange", DataType::Boolean, true),
        Field::new("stats", DataType::Utf8, true),
        Field::new("deletionVector", DataType::Struct(deletion_vector), true),
    ]);
    Arc::new(Schema::new(vec![
        Field::new("protocol", DataType::Struct(protocol), true),
        Field::new("metaData", DataType::Struct(metadata), true),
        Field::new("add", DataType::Struct(add), true),
    ]))
}
