use lopdf::content::Content;

/// 6要素アフィン変換行列 [a, b, c, d, e, f]
/// PDF仕様: [ a b 0 ]
///          [ c d 0 ]
///          [ e f 1 ]
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl Matrix {
    /// 単位行列を返す。
    pub fn identity() -> Self {
        Self::translate(0.0, 0.0)
    }

    /// 平行移動行列 [1 0 0 1 tx ty] を返す。
    pub fn translate(tx: f64, ty: f64) -> Self {
        Self {
            a: 1.0,
            b: 0.0,
            c: 0.0,
            d: 1.0,
            e: tx,
            f: ty,
        }
    }

    /// self * other (行列の右乗算)
    pub fn multiply(&self, other: &Matrix) -> Matrix {
        Matrix {
            a: self.a * other.a + self.b * other.c,
            b: self.a * other.b + self.b * other.d,
            c: self.c * other.a + self.d * other.c,
            d: self.c * other.b + self.d * other.d,
            e: self.e * other.a + self.f * other.c + other.e,
            f: self.e * other.b + self.f * other.d + other.f,
        }
    }

    /// 点 (x, y) を変換する（行ベクトル規約: [x y 1] × M）。
    pub fn transform_point(&self, x: f64, y: f64) -> (f64, f64) {
        (
            self.a * x + self.c * y + self.e,
            self.b * x + self.d * y + self.f,
        )
    }

    /// 縦方向の拡大率（テキスト空間1単位がユーザー空間で何ポイントか）。
    pub fn vertical_scale(&self) -> f64 {
        (self.c * self.c + self.d * self.d).sqrt()
    }

    /// オペランド6個から行列を作る（cm / Tm 共通）。
    pub(crate) fn from_operands(
        operands: &[lopdf::Object],
    ) -> crate::error::Result<Option<Self>> {
        if operands.len() != 6 {
            return Ok(None);
        }
        let vals: Vec<f64> = operands
            .iter()
            .map(operand_to_f64)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(Matrix {
            a: vals[0],
            b: vals[1],
            c: vals[2],
            d: vals[3],
            e: vals[4],
            f: vals[5],
        }))
    }
}

/// 矩形領域を表すバウンディングボックス（PDFユーザー空間、y軸上向き）。
#[derive(Debug, Clone, PartialEq)]
pub struct BBox {
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
}

impl BBox {
    pub fn width(&self) -> f64 {
        self.x_max - self.x_min
    }

    pub fn height(&self) -> f64 {
        self.y_max - self.y_min
    }

    /// 左上の点 (x_min, y_max)。
    pub fn top_left(&self) -> (f64, f64) {
        (self.x_min, self.y_max)
    }

    pub fn is_finite(&self) -> bool {
        [self.x_min, self.y_min, self.x_max, self.y_max]
            .iter()
            .all(|v| v.is_finite())
    }

    /// 原点を (dx, dy) だけずらしたBBoxを返す。
    pub fn offset(&self, dx: f64, dy: f64) -> BBox {
        BBox {
            x_min: self.x_min - dx,
            y_min: self.y_min - dy,
            x_max: self.x_max - dx,
            y_max: self.y_max - dy,
        }
    }
}

/// XObjectの配置情報。
#[derive(Debug, Clone)]
pub struct XObjectPlacement {
    /// XObjectの名前 (e.g. "Im1")
    pub name: String,
    /// 描画時のCTM
    pub ctm: Matrix,
    /// CTMから計算したBBox
    pub bbox: BBox,
}

/// コンテンツストリームを解析し、Doオペレータで描画される全XObjectの配置を
/// 出現順に返す。
///
/// q/Q でCTMスタックを追跡し、cm でCTMを更新する。Image/Formの区別は
/// 呼び出し側がリソース辞書を見て行う。
pub fn extract_xobject_placements(
    content_bytes: &[u8],
) -> crate::error::Result<Vec<XObjectPlacement>> {
    if content_bytes.is_empty() {
        return Ok(Vec::new());
    }

    let content = Content::decode(content_bytes)
        .map_err(|e| crate::error::PdfCompressError::content_stream(e.to_string()))?;

    let mut ctm_stack: Vec<Matrix> = vec![Matrix::identity()];
    let mut placements: Vec<XObjectPlacement> = Vec::new();

    for op in &content.operations {
        match op.operator.as_str() {
            "q" => {
                let current = ctm_stack.last().cloned().unwrap_or_else(Matrix::identity);
                ctm_stack.push(current);
            }
            "Q" => {
                if ctm_stack.len() > 1 {
                    ctm_stack.pop();
                }
            }
            "cm" => {
                if let Some(cm) = Matrix::from_operands(&op.operands)?
                    && let Some(current) = ctm_stack.last_mut()
                {
                    *current = cm.multiply(current);
                }
            }
            "Do" => {
                let Some(name_bytes) = op.operands.first().and_then(|o| o.as_name().ok()) else {
                    continue;
                };
                let ctm = ctm_stack.last().cloned().unwrap_or_else(Matrix::identity);
                let bbox = ctm_to_bbox(&ctm);
                placements.push(XObjectPlacement {
                    name: String::from_utf8_lossy(name_bytes).into_owned(),
                    ctm,
                    bbox,
                });
            }
            _ => {}
        }
    }

    Ok(placements)
}

/// lopdfのObjectから数値をf64として取得する。
pub(crate) fn operand_to_f64(obj: &lopdf::Object) -> crate::error::Result<f64> {
    match obj {
        lopdf::Object::Integer(i) => Ok(*i as f64),
        lopdf::Object::Real(r) => Ok(*r as f64),
        _ => Err(crate::error::PdfCompressError::content_stream(format!(
            "expected numeric operand, got {:?}",
            obj
        ))),
    }
}

/// CTMからBBoxを計算する。
/// 単位正方形 [0,0]-[1,1] の4頂点をCTMで変換し、min/maxを取る。
pub(crate) fn ctm_to_bbox(ctm: &Matrix) -> BBox {
    let corners = [(0.0, 0.0), (1.0, 0.0), (0.0, 1.0), (1.0, 1.0)]
        .map(|(x, y)| ctm.transform_point(x, y));

    corners.iter().fold(
        BBox {
            x_min: f64::INFINITY,
            y_min: f64::INFINITY,
            x_max: f64::NEG_INFINITY,
            y_max: f64::NEG_INFINITY,
        },
        |acc, &(x, y)| BBox {
            x_min: acc.x_min.min(x),
            y_min: acc.y_min.min(y),
            x_max: acc.x_max.max(x),
            y_max: acc.y_max.max(y),
        },
    )
}
