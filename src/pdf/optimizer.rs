// 保存時の最適化: コンテンツ正規化、重複ストリーム統合、孤立オブジェクト除去、FlateDecode圧縮

use std::collections::HashMap;
use std::io::Write;

use flate2::Compression;
use flate2::write::ZlibEncoder;
use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, ObjectId, Stream, dictionary};
use sha2::{Digest, Sha256};

use crate::pdf::WriteOptions;

/// 各パスの処理件数
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptimizeStats {
    pub cleaned_pages: usize,
    pub merged_streams: usize,
    pub pruned_objects: usize,
    pub deflated_streams: usize,
}

/// ページのコンテンツストリームを解析し直して再エンコードする。
///
/// 複数のContentsは1本に結合され、空の `q Q` の組は取り除かれる。
/// 解析できないページはそのまま残す。
pub fn clean_content_streams(doc: &mut Document) -> usize {
    let page_ids: Vec<ObjectId> = doc.get_pages().into_values().collect();
    let mut cleaned = 0;

    for page_id in page_ids {
        let Ok(raw) = doc.get_page_content(page_id) else {
            continue;
        };
        let content = match Content::decode(&raw) {
            Ok(c) => c,
            Err(e) => {
                tracing::debug!(page = ?page_id, error = %e, "leaving unparsable content as-is");
                continue;
            }
        };
        let operations = drop_empty_save_restore(content.operations);
        let Ok(bytes) = (Content { operations }).encode() else {
            continue;
        };

        let content_id = doc.add_object(Stream::new(dictionary! {}, bytes));
        if let Ok(page) = doc.get_dictionary_mut(page_id) {
            page.set("Contents", Object::Reference(content_id));
            cleaned += 1;
        }
    }

    cleaned
}

/// 間に何も無い `q` と `Q` の組を除去する（入れ子になった空の組も消える）。
fn drop_empty_save_restore(operations: Vec<Operation>) -> Vec<Operation> {
    let mut out: Vec<Operation> = Vec::with_capacity(operations.len());
    for op in operations {
        if op.operator == "Q" && out.last().is_some_and(|prev| prev.operator == "q") {
            out.pop();
            continue;
        }
        out.push(op);
    }
    out
}

/// 辞書と内容が完全に一致するストリームを1つに統合し、参照を付け替える。
pub fn merge_duplicate_streams(doc: &mut Document) -> usize {
    let mut canonical: HashMap<[u8; 32], ObjectId> = HashMap::new();
    let mut replacements: HashMap<ObjectId, ObjectId> = HashMap::new();

    // BTreeMapの順に走査するので、番号の小さい方が残る
    for (&id, obj) in &doc.objects {
        let Object::Stream(stream) = obj else {
            continue;
        };
        let key = stream_digest(stream);
        match canonical.get(&key) {
            Some(&keep) => {
                replacements.insert(id, keep);
            }
            None => {
                canonical.insert(key, id);
            }
        }
    }

    if replacements.is_empty() {
        return 0;
    }

    for obj in doc.objects.values_mut() {
        replace_references(obj, &replacements);
    }
    for (_, value) in doc.trailer.iter_mut() {
        replace_references(value, &replacements);
    }
    for id in replacements.keys() {
        doc.objects.remove(id);
    }

    replacements.len()
}

/// ストリームの辞書（キー順）と内容のSHA-256
fn stream_digest(stream: &Stream) -> [u8; 32] {
    let mut hasher = Sha256::new();
    let mut entries: Vec<(&Vec<u8>, &Object)> = stream.dict.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    for (key, value) in entries {
        hasher.update(key);
        hasher.update(format!("{:?}", value).as_bytes());
    }
    hasher.update(b"stream");
    hasher.update(&stream.content);
    hasher.finalize().into()
}

fn replace_references(obj: &mut Object, replacements: &HashMap<ObjectId, ObjectId>) {
    match obj {
        Object::Reference(id) => {
            if let Some(&new_id) = replacements.get(id) {
                *id = new_id;
            }
        }
        Object::Array(items) => {
            for item in items {
                replace_references(item, replacements);
            }
        }
        Object::Dictionary(dict) => {
            for (_, value) in dict.iter_mut() {
                replace_references(value, replacements);
            }
        }
        Object::Stream(stream) => {
            for (_, value) in stream.dict.iter_mut() {
                replace_references(value, replacements);
            }
        }
        _ => {}
    }
}

/// ドキュメント内の未圧縮ストリームにFlateDecode圧縮を適用する。
///
/// 既にフィルターが設定されているストリームはスキップする（二重圧縮防止）。
/// 圧縮しても小さくならないストリームもそのまま残す。
pub fn compress_streams(doc: &mut Document) -> usize {
    let mut count = 0;

    for obj in doc.objects.values_mut() {
        let Object::Stream(stream) = obj else {
            continue;
        };
        if stream.dict.get(b"Filter").is_ok() {
            continue;
        }

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
        if encoder.write_all(&stream.content).is_err() {
            continue;
        }
        let Ok(compressed) = encoder.finish() else {
            continue;
        };
        if compressed.len() >= stream.content.len() {
            continue;
        }

        stream.dict.set("Filter", "FlateDecode");
        stream.set_content(compressed);
        count += 1;
    }

    count
}

/// 孤立オブジェクト（どこからも参照されていないオブジェクト）を除去する。
pub fn delete_unused_objects(doc: &mut Document) -> usize {
    doc.prune_objects().len()
}

/// 保存オプションに従って最適化の全パスを順序通りに実行する。
///
/// 1. コンテンツストリームの正規化 (`clean`)
/// 2. 重複ストリームの統合 (`garbage >= 3`)
/// 3. 孤立オブジェクトの除去 (`garbage >= 1`)
/// 4. オブジェクト番号の振り直し (`garbage >= 2`)
/// 5. 未圧縮ストリームの圧縮 (`deflate`)
pub fn optimize(doc: &mut Document, options: &WriteOptions) -> OptimizeStats {
    let mut stats = OptimizeStats::default();

    if options.clean {
        stats.cleaned_pages = clean_content_streams(doc);
    }
    if options.garbage >= 3 {
        stats.merged_streams = merge_duplicate_streams(doc);
    }
    if options.garbage >= 1 {
        stats.pruned_objects = delete_unused_objects(doc);
    }
    if options.garbage >= 2 {
        doc.renumber_objects();
    }
    if options.deflate {
        stats.deflated_streams = compress_streams(doc);
    }

    tracing::debug!(?stats, "document optimized");
    stats
}
