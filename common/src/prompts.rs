//! プロンプト生成モジュール
//!
//! - BATCH_INSTRUCTION: バッチ共通の指示文（メッセージ優先・分類規則・出力形式）
//! - build_file_prompt: 画像1枚ごとのテキストパート

/// バッチ共通の指示文
///
/// 規則:
/// (a) メッセージ本文が画像より優先
/// (b) 損失・破損 → Avaria、スタッフ/店舗の消費 → Uso Interno
/// (c) 本文が無い・説明的でない場合はラベルから抽出
/// (d) どちらからも商品が決まらなければ Erro
pub const BATCH_INSTRUCTION: &str = r#"Sua tarefa é analisar os itens a seguir e catalogar produtos como "Avaria" ou "Uso Interno".
Cada item tem uma imagem e, opcionalmente, um texto de contexto de uma conversa.

[REGRA DE OURO]: O "Contexto da Mensagem" é a fonte de informação MAIS IMPORTANTE. A imagem serve apenas como apoio visual. Trate o texto como a fonte da verdade.

[COMO ANALISAR]:
1. Se o "Contexto da Mensagem" descreve produtos (ex: "2 alface", "coentro", "saco de lixo"), EXTRAIA OS ITENS DIRETAMENTE DO TEXTO.
   - Se o texto menciona perdas, quebras ou produtos estragados, use o `tipo` "Avaria".
   - Se o texto menciona consumo da equipe ou da loja, use o `tipo` "Uso Interno".
   - Se a imagem não mostra uma etiqueta clara, `peso`, `marca` e `codigo_barras` devem ser "N/A".
   - Se o texto contiver múltiplos itens (ex: "4 COENTRO\n2 ALFACE"), crie um item para cada um na lista `itens`.
2. Se o texto estiver vazio ou não for descritivo e a imagem mostrar uma etiqueta legível, extraia os dados da etiqueta.
   - "Avaria": extraia NOME e PESO.
   - "Uso Interno": extraia NOME, MARCA e CÓDIGO DE BARRAS (priorize o código de barras).
3. Se for impossível determinar o produto ou a categoria, use o `tipo` "Erro" com o motivo em `detalhes`.

[FORMATO DA RESPOSTA]: um único objeto JSON cujas chaves são os nomes dos arquivos.
{
  "IMG-1234.jpg": {
    "tipo": "Avaria",
    "itens": [
      {"produto": "COENTRO", "peso": "N/A", "marca": "N/A", "codigo_barras": "N/A"},
      {"produto": "ALFACE", "peso": "N/A", "marca": "N/A", "codigo_barras": "N/A"}
    ]
  },
  "IMG-5678.jpg": {"tipo": "Erro", "detalhes": "etiqueta ilegível"}
}

Agora, analise os seguintes arquivos:"#;

/// 画像1枚分のテキストパート
///
/// 対応メッセージがあれば `[Contexto da Mensagem]` として付加する。
pub fn build_file_prompt(file_name: &str, message: Option<&str>) -> String {
    match message {
        Some(text) if !text.trim().is_empty() => {
            format!("Arquivo: {}\n[Contexto da Mensagem]:\n{}", file_name, text)
        }
        _ => format!("Arquivo: {}", file_name),
    }
}
