//! 分卷 PDF 合并。
//!
//! 按序号读取 `(0001)`、`(0002)`… 直到缺号为止，把每一页（连同资源、字体、
//! 内容流）深拷贝进第一卷，经临时文件写出合并结果后删除各分卷。

use std::collections::HashMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use lopdf::{Document, Object, ObjectId};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{error, info, warn};

use super::error::{GeneratorError, Result};
use super::splitter::OutputNaming;

/// What to do with a part that can't be read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergePolicy {
    /// Abort; nothing is written and every part is kept.
    #[default]
    Strict,
    /// Skip the part and keep going.
    Lossy,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeReport {
    pub target: PathBuf,
    pub merged: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
    pub pages: usize,
}

/// Deep-copies objects from one document into another, remapping ids.
struct ObjectCopier<'a> {
    source: &'a Document,
    target: &'a mut Document,
    id_map: HashMap<ObjectId, ObjectId>,
}

impl<'a> ObjectCopier<'a> {
    fn new(source: &'a Document, target: &'a mut Document) -> Self {
        Self {
            source,
            target,
            id_map: HashMap::new(),
        }
    }

    fn copy_object(&mut self, source_id: ObjectId) -> std::result::Result<ObjectId, lopdf::Error> {
        if let Some(id) = self.id_map.get(&source_id) {
            return Ok(*id);
        }
        // 先占位再递归，引用成环时直接命中 id_map
        let new_id = self.target.add_object(Object::Null);
        self.id_map.insert(source_id, new_id);

        let obj = self.source.get_object(source_id)?.clone();
        let remapped = self.remap(obj)?;
        self.target.objects.insert(new_id, remapped);
        Ok(new_id)
    }

    fn remap(&mut self, obj: Object) -> std::result::Result<Object, lopdf::Error> {
        match obj {
            Object::Reference(id) => Ok(Object::Reference(self.copy_object(id)?)),
            Object::Array(items) => Ok(Object::Array(
                items
                    .into_iter()
                    .map(|o| self.remap(o))
                    .collect::<std::result::Result<Vec<_>, _>>()?,
            )),
            Object::Dictionary(mut dict) => {
                for (_, value) in dict.iter_mut() {
                    *value = self.remap(value.clone())?;
                }
                Ok(Object::Dictionary(dict))
            }
            Object::Stream(mut stream) => {
                for (_, value) in stream.dict.iter_mut() {
                    *value = self.remap(value.clone())?;
                }
                Ok(Object::Stream(stream))
            }
            other => Ok(other),
        }
    }

    /// Copies one page without its `/Parent`, pulling inherited attributes
    /// down so the page stands on its own.
    fn copy_page(&mut self, page_id: ObjectId) -> std::result::Result<ObjectId, lopdf::Error> {
        let mut page = self.source.get_dictionary(page_id)?.clone();
        for key in [b"MediaBox".as_slice(), b"Resources".as_slice()] {
            if page.has(key) {
                continue;
            }
            if let Some(value) = inherited(self.source, &page, key) {
                page.set(key.to_vec(), value);
            }
        }
        page.remove(b"Parent");
        let remapped = self.remap(Object::Dictionary(page))?;
        Ok(self.target.add_object(remapped))
    }
}

fn inherited(doc: &Document, page: &lopdf::Dictionary, key: &[u8]) -> Option<Object> {
    let mut parent = page.get(b"Parent").and_then(Object::as_reference).ok();
    // 页树不会很深，限制层数防止环
    for _ in 0..32 {
        let dict = doc.get_dictionary(parent?).ok()?;
        if let Ok(value) = dict.get(key) {
            return Some(value.clone());
        }
        parent = dict.get(b"Parent").and_then(Object::as_reference).ok();
    }
    None
}

/// Appends every page of `source` to the page tree of `target`.
fn append_pages(target: &mut Document, source: &Document) -> std::result::Result<usize, lopdf::Error> {
    let pages: Vec<ObjectId> = source.get_pages().into_values().collect();
    if pages.is_empty() {
        return Ok(0);
    }

    let mut copier = ObjectCopier::new(source, target);
    let mut new_ids = Vec::with_capacity(pages.len());
    for page_id in pages {
        new_ids.push(copier.copy_page(page_id)?);
    }

    let root_id = target.trailer.get(b"Root")?.as_reference()?;
    let pages_id = target.get_dictionary(root_id)?.get(b"Pages")?.as_reference()?;
    for id in &new_ids {
        target.get_dictionary_mut(*id)?.set("Parent", pages_id);
    }
    let pages_dict = target.get_dictionary_mut(pages_id)?;
    let mut kids = pages_dict.get(b"Kids")?.as_array()?.clone();
    let count = pages_dict.get(b"Count")?.as_i64()?;
    kids.extend(new_ids.iter().map(|id| Object::Reference(*id)));
    pages_dict.set("Kids", kids);
    pages_dict.set("Count", count + new_ids.len() as i64);
    Ok(new_ids.len())
}

fn load(path: &Path) -> Result<Document> {
    let bytes = fs::read(path).map_err(|e| GeneratorError::io(path, e))?;
    Ok(Document::load_mem(&bytes)?)
}

/// Concatenates split parts into one PDF.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentMerger {
    policy: MergePolicy,
}

impl DocumentMerger {
    pub fn new(policy: MergePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> MergePolicy {
        self.policy
    }

    /// Merges the parts one generation run wrote into `naming.final_path()`.
    /// `failed` are the parts that run could not write: `Strict` refuses to
    /// merge around them, `Lossy` reports them as skipped.
    pub fn merge_written(
        &self,
        written: &[PathBuf],
        failed: &[PathBuf],
        naming: &OutputNaming,
    ) -> Result<MergeReport> {
        let target = naming.final_path();
        if !failed.is_empty() && self.policy == MergePolicy::Strict {
            let names: Vec<String> = failed.iter().map(|p| p.display().to_string()).collect();
            error!("{} 个分卷未写出，合并中止，分卷已保留", failed.len());
            return Err(GeneratorError::Merge {
                path: target,
                reason: format!("split parts were not written: {}", names.join(", ")),
            });
        }
        let mut report = self.merge(written, &target)?;
        if !failed.is_empty() {
            warn!("{} 个分卷未写出，合并结果缺少这些内容", failed.len());
            report.skipped.extend(failed.iter().cloned());
            report.skipped.sort();
        }
        Ok(report)
    }

    pub fn merge(&self, parts: &[PathBuf], target: &Path) -> Result<MergeReport> {
        let fail = |reason: String| GeneratorError::Merge {
            path: target.to_path_buf(),
            reason,
        };
        if parts.is_empty() {
            return Err(fail("no split parts found".to_string()));
        }
        info!("开始合并 {} 个分卷 -> {}", parts.len(), target.display());

        let mut report = MergeReport {
            target: target.to_path_buf(),
            ..MergeReport::default()
        };
        let mut merged: Option<Document> = None;

        for part in parts {
            let doc = match load(part) {
                Ok(doc) => doc,
                Err(err) => match self.policy {
                    MergePolicy::Strict => {
                        error!("读取分卷 {} 失败，合并中止，分卷已保留: {err}", part.display());
                        return Err(fail(format!("{}: {err}", part.display())));
                    }
                    MergePolicy::Lossy => {
                        error!("读取分卷 {} 失败，已跳过: {err}", part.display());
                        report.skipped.push(part.clone());
                        continue;
                    }
                },
            };

            match merged.as_mut() {
                None => {
                    report.pages += doc.get_pages().len();
                    merged = Some(doc);
                }
                Some(target_doc) => {
                    report.pages += append_pages(target_doc, &doc)?;
                }
            }
            report.merged.push(part.clone());
        }

        let Some(mut doc) = merged else {
            return Err(fail("no readable split parts".to_string()));
        };
        doc.renumber_objects();
        doc.compress();
        write_atomically(&mut doc, target)?;

        for part in &report.merged {
            if part.as_path() == target {
                continue;
            }
            if let Err(e) = fs::remove_file(part) {
                warn!("删除分卷 {} 失败: {e}", part.display());
            }
        }
        if !report.skipped.is_empty() {
            warn!("合并时跳过了 {} 个无法读取的分卷", report.skipped.len());
        }
        info!(
            "合并完成: {} 页, {} 个分卷 -> {}",
            report.pages,
            report.merged.len(),
            target.display()
        );
        Ok(report)
    }
}

/// Writes through a temp file next to `target`, then renames it into place.
fn write_atomically(doc: &mut Document, target: &Path) -> Result<()> {
    let dir = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir).map_err(|e| GeneratorError::io(&dir, e))?;
    let tmp = NamedTempFile::new_in(&dir).map_err(|e| GeneratorError::io(&dir, e))?;
    {
        let mut writer = BufWriter::new(tmp.as_file());
        doc.save_to(&mut writer).map_err(|e| GeneratorError::Save {
            path: tmp.path().to_path_buf(),
            reason: e.to_string(),
        })?;
        writer.flush().map_err(|e| GeneratorError::io(tmp.path(), e))?;
    }
    tmp.persist(target)
        .map_err(|e| GeneratorError::io(target, e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::content::{Content, Operation};
    use lopdf::{Stream, dictionary};

    fn write_pdf(path: &Path, pages: usize) {
        let mut doc = Document::with_version("1.7");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });
        let mut kids = Vec::new();
        for i in 0..pages {
            let content = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 12.into()]),
                    Operation::new("Td", vec![10.into(), 10.into()]),
                    Operation::new("Tj", vec![Object::string_literal(format!("page {i}"))]),
                    Operation::new("ET", vec![]),
                ],
            };
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(Object::from(page_id));
        }
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => pages as i64,
                "MediaBox" => vec![0.into(), 0.into(), 200.into(), 300.into()],
                "Resources" => resources_id,
            }),
        );
        let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
        doc.trailer.set("Root", catalog_id);
        let mut file = fs::File::create(path).unwrap();
        doc.save_to(&mut file).unwrap();
    }

    fn page_count(path: &Path) -> usize {
        load(path).unwrap().get_pages().len()
    }

    #[test]
    fn parts_are_concatenated_and_removed() {
        let dir = tempfile::tempdir().unwrap();
        let naming = OutputNaming::new(dir.path(), "book", "a4", "pdf");
        write_pdf(&naming.part_path(1), 2);
        write_pdf(&naming.part_path(2), 3);
        write_pdf(&naming.part_path(3), 1);

        let parts = [naming.part_path(1), naming.part_path(2), naming.part_path(3)];

        let report = DocumentMerger::default()
            .merge(&parts, &naming.final_path())
            .unwrap();
        assert_eq!(report.pages, 6);
        assert_eq!(report.merged.len(), 3);
        assert_eq!(page_count(&naming.final_path()), 6);
        assert!(parts.iter().all(|p| !p.exists()));
    }

    #[test]
    fn inherited_page_attributes_are_carried_over() {
        let dir = tempfile::tempdir().unwrap();
        let naming = OutputNaming::new(dir.path(), "book", "a4", "pdf");
        write_pdf(&naming.part_path(1), 1);
        write_pdf(&naming.part_path(2), 1);
        DocumentMerger::default()
            .merge(&[naming.part_path(1), naming.part_path(2)], &naming.final_path())
            .unwrap();

        let doc = load(&naming.final_path()).unwrap();
        let pages: Vec<ObjectId> = doc.get_pages().into_values().collect();
        let copied = doc.get_dictionary(pages[1]).unwrap();
        assert!(copied.has(b"MediaBox"));
        assert!(copied.has(b"Resources"));
    }

    #[test]
    fn strict_policy_keeps_parts_on_bad_input() {
        let dir = tempfile::tempdir().unwrap();
        let naming = OutputNaming::new(dir.path(), "book", "a4", "pdf");
        write_pdf(&naming.part_path(1), 1);
        fs::write(naming.part_path(2), b"not a pdf").unwrap();
        let parts = [naming.part_path(1), naming.part_path(2)];

        let err = DocumentMerger::new(MergePolicy::Strict)
            .merge(&parts, &naming.final_path())
            .unwrap_err();
        assert!(matches!(err, GeneratorError::Merge { .. }));
        assert!(!naming.final_path().exists());
        assert!(parts.iter().all(|p| p.exists()));
    }

    #[test]
    fn lossy_policy_skips_bad_parts() {
        let dir = tempfile::tempdir().unwrap();
        let naming = OutputNaming::new(dir.path(), "book", "a4", "pdf");
        write_pdf(&naming.part_path(1), 2);
        fs::write(naming.part_path(2), b"not a pdf").unwrap();
        write_pdf(&naming.part_path(3), 2);
        let parts = [naming.part_path(1), naming.part_path(2), naming.part_path(3)];

        let report = DocumentMerger::new(MergePolicy::Lossy)
            .merge(&parts, &naming.final_path())
            .unwrap();
        assert_eq!(report.skipped, vec![naming.part_path(2)]);
        assert_eq!(page_count(&naming.final_path()), 4);
    }

    #[test]
    fn nothing_to_merge_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let naming = OutputNaming::new(dir.path(), "book", "a4", "pdf");
        assert!(DocumentMerger::default().merge(&[], &naming.final_path()).is_err());
    }

    #[test]
    fn strict_refuses_to_merge_around_unwritten_parts() {
        let dir = tempfile::tempdir().unwrap();
        let naming = OutputNaming::new(dir.path(), "book", "a4", "pdf");
        write_pdf(&naming.part_path(1), 1);
        write_pdf(&naming.part_path(3), 1);
        let written = [naming.part_path(1), naming.part_path(3)];
        let failed = [naming.part_path(2)];

        let err = DocumentMerger::new(MergePolicy::Strict)
            .merge_written(&written, &failed, &naming)
            .unwrap_err();
        assert!(err.to_string().contains("(0002)"));
        assert!(!naming.final_path().exists());
        assert!(written.iter().all(|p| p.exists()));
    }

    #[test]
    fn lossy_reports_unwritten_parts_as_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let naming = OutputNaming::new(dir.path(), "book", "a4", "pdf");
        write_pdf(&naming.part_path(1), 1);
        write_pdf(&naming.part_path(3), 2);
        let written = [naming.part_path(1), naming.part_path(3)];

        let report = DocumentMerger::new(MergePolicy::Lossy)
            .merge_written(&written, &[naming.part_path(2)], &naming)
            .unwrap();
        assert_eq!(report.merged, written.to_vec());
        assert_eq!(report.skipped, vec![naming.part_path(2)]);
        assert_eq!(page_count(&naming.final_path()), 3);
    }

    #[test]
    fn only_the_given_parts_are_merged() {
        let dir = tempfile::tempdir().unwrap();
        let naming = OutputNaming::new(dir.path(), "book", "a4", "pdf");
        write_pdf(&naming.part_path(1), 1);
        write_pdf(&naming.part_path(2), 1);
        // left over from an earlier, longer run
        write_pdf(&naming.part_path(3), 4);
        let written = [naming.part_path(1), naming.part_path(2)];

        let report = DocumentMerger::default()
            .merge_written(&written, &[], &naming)
            .unwrap();
        assert_eq!(report.pages, 2);
        assert_eq!(page_count(&naming.final_path()), 2);
        assert!(naming.part_path(3).exists());
    }
}
