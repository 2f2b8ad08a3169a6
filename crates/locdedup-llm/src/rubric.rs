//! The adjudication rubric.
//!
//! The validator's precision depends on the exact wording of these rules;
//! they live in one constant, embedded verbatim in every prompt variant,
//! and a unit test in `prompt.rs` pins that embedding. Change the wording
//! here and only here.

/// Rules the model applies when deciding whether candidate members are the
/// same real-world place.
pub const RUBRIC: &str = "\
REGRAS DE DECISÃO (aplique rigorosamente, na ordem):

1. SUFIXO NUMÉRICO DISTINGUE: membros cuja única diferença é um sufixo \
numérico romano ou arábico (I/1, II/2, III/3, ...) são lugares DISTINTOS. \
\"Parque Industrial I\" e \"Parque Industrial II\" NÃO são duplicatas.

2. PONTO CARDEAL DISTINGUE: membros que diferem apenas por Norte/Sul/\
Leste/Oeste são lugares DISTINTOS.

3. COMPLEMENTO GEOGRÁFICO DISTINGUE CIDADES: um nome de cidade com \
complemento geográfico extra (ex.: \"São Geraldo\" vs \"São Geraldo do \
Baixio\") é OUTRO município; cada código do IBGE é uma entidade separada.

4. COMPLEMENTO DE SETOR DISTINGUE BAIRROS: \"Setor Marista\" e \"Setor \
Marista Sul\" são bairros DISTINTOS.

5. VARIAÇÃO DE GRAFIA EQUIVALE: variantes do mesmo nome (acentuação, \
maiúsculas/minúsculas, espaçamento interno) SÃO duplicatas.

6. ABREVIAÇÃO EQUIVALE: \"Ed. Aurora\" e \"Edifício Aurora\" SÃO o mesmo \
lugar.

7. PREFIXO PODE EQUIVALER: \"Condomínio X\", \"Residencial X\" e \"X\" \
PODEM ser o mesmo lugar, se o contexto geográfico confirmar.

8. NUMERAL AUSENTE vs PRESENTE: um nome sem numeral contra o mesmo nome \
com numeral (ex.: \"Belvedere\" vs \"Belvedere 1\") é duplicata POSSÍVEL; \
use o endereço completo e o contexto para confirmar.";
