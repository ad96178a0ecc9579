pub mod content_stream;
pub mod font;
pub mod image_xobject;
pub mod optimizer;
pub mod reader;
pub mod text_state;
pub mod writer;

use std::path::Path;

use lopdf::ObjectId;

pub use content_stream::BBox;

/// ページの矩形（ポイント単位）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageRect {
    pub width: f64,
    pub height: f64,
}

impl PageRect {
    pub fn is_valid(&self) -> bool {
        self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0
    }
}

/// ページ上の位置（PDFユーザー空間、y軸上向き）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// 位置付きテキスト断片（1回のTj/TJに対応）
#[derive(Debug, Clone, PartialEq)]
pub struct TextSpan {
    pub text: String,
    pub font_size: f64,
    pub bbox: BBox,
}

impl TextSpan {
    /// 再配置に使う左上の点。
    pub fn top_left(&self) -> Point {
        let (x, y) = self.bbox.top_left();
        Point { x, y }
    }
}

/// 入力文書内の埋め込み画像への参照と、ページ上の配置。
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRef {
    pub id: ObjectId,
    pub bbox: BBox,
}

/// 入力文書の1ページの読み取り専用ビュー。
#[derive(Debug, Clone)]
pub struct SourcePage {
    /// 0始まりのページ番号
    pub index: u32,
    /// 見える範囲（CropBox、無ければMediaBox）の大きさ
    pub rect: PageRect,
    /// /Rotate（0, 90, 180, 270）
    pub rotation: i64,
    pub text_spans: Vec<TextSpan>,
    pub image_refs: Vec<ImageRef>,
}

/// 画像XObjectを解決した結果: エンコード済みバイト列と形式の拡張子。
#[derive(Debug, Clone)]
pub struct ExtractedImage {
    pub data: Vec<u8>,
    /// "jpeg", "jpx", "png"
    pub ext: &'static str,
}

/// 出力文書のページを指すハンドル（0始まり）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageHandle(pub usize);

/// 保存時の最適化オプション。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// 未圧縮ストリームをFlate圧縮する
    pub deflate: bool,
    /// 0: なし, 1: 未参照オブジェクト削除, 2: +番号振り直し, 3以上: +重複ストリーム統合
    pub garbage: u8,
    /// ページのコンテンツストリームを正規化する
    pub clean: bool,
}

impl WriteOptions {
    /// deflate + garbage 4 + clean
    pub fn maximum() -> Self {
        WriteOptions {
            deflate: true,
            garbage: 4,
            clean: true,
        }
    }
}

/// 入力文書の読み取り能力。
pub trait DocumentReader {
    fn page_count(&self) -> u32;

    /// `index` は0始まり。
    fn get_page(&self, index: u32) -> crate::error::Result<SourcePage>;

    fn extract_image(&self, image: &ImageRef) -> crate::error::Result<ExtractedImage>;
}

/// 出力文書の構築能力。ページは追加順に並ぶ。
pub trait DocumentWriter {
    fn new_page(&mut self, rect: PageRect) -> crate::error::Result<PageHandle>;

    /// ページに /Rotate を設定する。`degrees` は90の倍数。
    fn set_rotation(&mut self, page: PageHandle, degrees: i64) -> crate::error::Result<()>;

    /// `pos` はテキストの左上（ページ座標）。
    fn insert_text(
        &mut self,
        page: PageHandle,
        pos: Point,
        text: &str,
        font_size: f64,
    ) -> crate::error::Result<()>;

    fn insert_image(&mut self, page: PageHandle, bbox: &BBox, data: &[u8])
    -> crate::error::Result<()>;

    fn page_count(&self) -> usize;

    /// 1回だけ呼べる。
    fn save(&mut self, path: &Path, options: &WriteOptions) -> crate::error::Result<()>;
}
