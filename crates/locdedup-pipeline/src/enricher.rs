//! Group enrichment: hierarchy context plus an authoritative reference name.
//!
//! Context comes from joins on the host schema, anchored per member. The
//! canonical name comes from a per-kind cascade of external sources, each
//! with its own confidence: IBGE for cities, a ViaCEP majority vote for
//! neighborhoods, direct ViaCEP for streets, Places for condos, and the
//! geocoder as the universal fallback. Every failure is swallowed per
//! group: a group without a canonical name is still mergeable by hand.

use crate::error::Result;
use crate::store::GroupStore;
use futures::future::join_all;
use locdedup::normalize::fold;
use locdedup::similarity::dice;
use locdedup::{CanonicalSource, DuplicateGroup, EntityKind, MemberContext};
use locdedup_resolvers::{Geocoder, IbgeRegistry, Places, ViaCep};
use sqlx::Row;
use tracing::{debug, info};

/// Registry matches below this Dice score are not trusted.
const REGISTRY_MIN_SCORE: f64 = 0.5;

/// Outcome of the canonical cascade for one group.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalResolution {
    pub name: String,
    pub source: CanonicalSource,
    /// Per-source confidence in `[0, 1]`.
    pub score: f64,
    /// Full address text, populated by the geocoder and Places paths.
    pub address: Option<String>,
}

/// What `enrich_group` settled on (also written back to the store).
#[derive(Debug, Clone)]
pub struct EnrichmentResult {
    pub canonical: Option<CanonicalResolution>,
    pub suggested_canonical_id: Option<String>,
    pub contexts: Vec<MemberContext>,
}

pub struct Enricher {
    store: GroupStore,
    registry: IbgeRegistry,
    viacep: ViaCep,
    geocoder: Geocoder,
    places: Places,
    /// Cap on context postal codes per neighborhood member (K).
    max_ceps_per_member: usize,
}

impl Enricher {
    #[must_use]
    pub fn new(
        store: GroupStore,
        registry: IbgeRegistry,
        viacep: ViaCep,
        geocoder: Geocoder,
        places: Places,
        max_ceps_per_member: usize,
    ) -> Self {
        Self {
            store,
            registry,
            viacep,
            geocoder,
            places,
            max_ceps_per_member: max_ceps_per_member.max(1),
        }
    }

    /// Resolve hierarchy context for a list of members of one kind.
    ///
    /// Members whose host row vanished resolve to a bare context (id and
    /// name only), keeping the output parallel to the input.
    pub async fn resolve_contexts(
        &self,
        kind: EntityKind,
        member_ids: &[String],
        member_names: &[String],
    ) -> Result<Vec<MemberContext>> {
        let mut contexts = Vec::with_capacity(member_ids.len());
        for (member_id, member_name) in member_ids.iter().zip(member_names) {
            let mut context = self
                .member_context(kind, member_id)
                .await?
                .unwrap_or_default();
            context.member_id = member_id.clone();
            context.member_name = member_name.clone();
            contexts.push(context);
        }
        Ok(contexts)
    }

    async fn member_context(
        &self,
        kind: EntityKind,
        member_id: &str,
    ) -> Result<Option<MemberContext>> {
        match kind {
            EntityKind::City => {
                let row = sqlx::query(
                    "SELECT c.id::text AS cidade_id, c.nome AS cidade_nome, c.uf,
                            (SELECT count(*) FROM bairros b WHERE b.cidade_id = c.id) AS filhos
                     FROM cidades c WHERE c.id = $1::bigint",
                )
                .bind(member_id)
                .fetch_optional(self.store.pool())
                .await?;
                Ok(row
                    .map(|r| -> Result<MemberContext> {
                        Ok(MemberContext {
                            uf: r.try_get("uf")?,
                            cidade_id: r.try_get("cidade_id")?,
                            cidade_nome: r.try_get("cidade_nome")?,
                            filhos: r.try_get("filhos")?,
                            ..MemberContext::default()
                        })
                    })
                    .transpose()?)
            }
            EntityKind::Neighborhood => {
                let row = sqlx::query(
                    "SELECT b.id::text AS bairro_id, b.nome AS bairro_nome,
                            c.id::text AS cidade_id, c.nome AS cidade_nome, c.uf,
                            (SELECT count(*) FROM ruas r WHERE r.bairro_id = b.id) AS filhos
                     FROM bairros b JOIN cidades c ON c.id = b.cidade_id
                     WHERE b.id = $1::uuid",
                )
                .bind(member_id)
                .fetch_optional(self.store.pool())
                .await?;
                let Some(r) = row else { return Ok(None) };

                let ceps: Vec<String> = sqlx::query_scalar(
                    "SELECT DISTINCT r.cep FROM ruas r
                     WHERE r.bairro_id = $1::uuid AND r.cep IS NOT NULL AND r.cep <> ''
                     ORDER BY r.cep
                     LIMIT $2",
                )
                .bind(member_id)
                .bind(self.max_ceps_per_member as i64)
                .fetch_all(self.store.pool())
                .await?;

                Ok(Some(MemberContext {
                    uf: r.try_get("uf")?,
                    cidade_id: r.try_get("cidade_id")?,
                    cidade_nome: r.try_get("cidade_nome")?,
                    bairro_id: r.try_get("bairro_id")?,
                    bairro_nome: r.try_get("bairro_nome")?,
                    ceps,
                    filhos: r.try_get("filhos")?,
                    ..MemberContext::default()
                }))
            }
            EntityKind::Street => {
                let row = sqlx::query(
                    "SELECT r.id::text AS rua_id, r.nome AS rua_nome, r.cep,
                            b.id::text AS bairro_id, b.nome AS bairro_nome,
                            c.id::text AS cidade_id, c.nome AS cidade_nome, c.uf,
                            (SELECT count(*) FROM condominios co WHERE co.rua_id = r.id) AS filhos
                     FROM ruas r
                     JOIN bairros b ON b.id = r.bairro_id
                     JOIN cidades c ON c.id = b.cidade_id
                     WHERE r.id = $1::uuid",
                )
                .bind(member_id)
                .fetch_optional(self.store.pool())
                .await?;
                Ok(row
                    .map(|r| -> Result<MemberContext> {
                        Ok(MemberContext {
                            uf: r.try_get("uf")?,
                            cidade_id: r.try_get("cidade_id")?,
                            cidade_nome: r.try_get("cidade_nome")?,
                            bairro_id: r.try_get("bairro_id")?,
                            bairro_nome: r.try_get("bairro_nome")?,
                            rua_id: r.try_get("rua_id")?,
                            rua_nome: r.try_get("rua_nome")?,
                            cep: r.try_get("cep")?,
                            filhos: r.try_get("filhos")?,
                            ..MemberContext::default()
                        })
                    })
                    .transpose()?)
            }
            EntityKind::Condo => {
                let row = sqlx::query(
                    "SELECT r.id::text AS rua_id, r.nome AS rua_nome, r.cep,
                            b.id::text AS bairro_id, b.nome AS bairro_nome,
                            c.id::text AS cidade_id, c.nome AS cidade_nome, c.uf
                     FROM condominios co
                     JOIN ruas r ON r.id = co.rua_id
                     JOIN bairros b ON b.id = r.bairro_id
                     JOIN cidades c ON c.id = b.cidade_id
                     WHERE co.id = $1::uuid",
                )
                .bind(member_id)
                .fetch_optional(self.store.pool())
                .await?;
                Ok(row
                    .map(|r| -> Result<MemberContext> {
                        Ok(MemberContext {
                            uf: r.try_get("uf")?,
                            cidade_id: r.try_get("cidade_id")?,
                            cidade_nome: r.try_get("cidade_nome")?,
                            bairro_id: r.try_get("bairro_id")?,
                            bairro_nome: r.try_get("bairro_nome")?,
                            rua_id: r.try_get("rua_id")?,
                            rua_nome: r.try_get("rua_nome")?,
                            cep: r.try_get("cep")?,
                            ..MemberContext::default()
                        })
                    })
                    .transpose()?)
            }
        }
    }

    /// Full enrichment of one group: contexts, canonical cascade, suggested
    /// canonical, and the write-back.
    pub async fn enrich_group(&self, group: &DuplicateGroup) -> Result<EnrichmentResult> {
        let contexts = self
            .resolve_contexts(group.entity_kind, &group.member_ids, &group.member_names)
            .await?;

        let canonical = self.resolve_canonical(group, &contexts).await;
        let suggested_canonical_id = canonical
            .as_ref()
            .and_then(|c| suggest_canonical(&group.member_ids, &group.member_names, &c.name));

        self.store
            .update_enrichment(
                group.id,
                canonical.as_ref().map(|c| c.name.as_str()),
                canonical.as_ref().map(|c| c.source),
                canonical.as_ref().and_then(|c| c.address.as_deref()),
                suggested_canonical_id.as_deref(),
            )
            .await?;
        self.store.replace_member_contexts(group.id, &contexts).await?;

        if let Some(c) = &canonical {
            info!(
                "group {} resolved to {:?} via {} (score {:.2})",
                group.id,
                c.name,
                c.source.as_str(),
                c.score
            );
        } else {
            debug!("group {} kept without canonical name", group.id);
        }

        Ok(EnrichmentResult {
            canonical,
            suggested_canonical_id,
            contexts,
        })
    }

    async fn resolve_canonical(
        &self,
        group: &DuplicateGroup,
        contexts: &[MemberContext],
    ) -> Option<CanonicalResolution> {
        let first_name = group.member_names.first()?;
        let first_context = contexts.first();

        match group.entity_kind {
            EntityKind::City => {
                self.resolve_city(first_name, first_context?).await
            }
            EntityKind::Neighborhood => {
                match self.vote_neighborhood(contexts).await {
                    Some(resolution) => Some(resolution),
                    None => self.geocode_fallback(group, contexts, 0.8, false).await,
                }
            }
            EntityKind::Street => match self.resolve_street(contexts).await {
                Some(resolution) => Some(resolution),
                None => self.geocode_fallback(group, contexts, 0.8, false).await,
            },
            EntityKind::Condo => match self.resolve_condo(group, contexts).await {
                Some(resolution) => Some(resolution),
                None => self.geocode_fallback(group, contexts, 0.7, true).await,
            },
        }
    }

    /// City: registry list ranked by Dice against the folded first member.
    async fn resolve_city(
        &self,
        first_name: &str,
        context: &MemberContext,
    ) -> Option<CanonicalResolution> {
        let uf = context.uf.as_deref()?;
        let names = self
            .registry
            .municipalities(uf)
            .await
            .into_iter()
            .map(|m| m.nome);

        match best_registry_match(first_name, names) {
            Some((nome, score)) if score >= REGISTRY_MIN_SCORE => Some(CanonicalResolution {
                name: nome,
                source: CanonicalSource::Registry,
                score,
                address: None,
            }),
            _ => {
                let result = self.geocoder.geocode(&format!("{first_name}, {uf}")).await?;
                Some(CanonicalResolution {
                    name: result.cidade?,
                    source: CanonicalSource::Geocoder,
                    score: 0.8,
                    address: result.formatted_address,
                })
            }
        }
    }

    /// Neighborhood: majority vote over every context postal code. Lookups
    /// fan out; the tally waits for all of them, so one slow or failing
    /// code never blocks the vote. Ties break toward the first-seen name.
    async fn vote_neighborhood(&self, contexts: &[MemberContext]) -> Option<CanonicalResolution> {
        let ceps: Vec<&String> = contexts.iter().flat_map(|c| c.ceps.iter()).collect();
        if ceps.is_empty() {
            return None;
        }

        let lookups = join_all(ceps.iter().map(|cep| self.viacep.lookup(cep.as_str()))).await;
        let resolved = lookups
            .into_iter()
            .map(|address| address.map(|a| a.bairro).filter(|b| !b.is_empty()));

        let (winner, wins, total_resolved) = majority_vote(resolved)?;
        Some(CanonicalResolution {
            name: winner,
            source: CanonicalSource::PostalCep,
            score: wins as f64 / total_resolved as f64,
            address: None,
        })
    }

    /// Street: the first member postal code that resolves to a street name.
    async fn resolve_street(&self, contexts: &[MemberContext]) -> Option<CanonicalResolution> {
        for context in contexts {
            let Some(cep) = context.cep.as_deref() else {
                continue;
            };
            if let Some(address) = self.viacep.lookup(cep).await {
                if !address.logradouro.is_empty() {
                    return Some(CanonicalResolution {
                        name: address.logradouro,
                        source: CanonicalSource::PostalCep,
                        score: 1.0,
                        address: None,
                    });
                }
            }
        }
        None
    }

    /// Condo: Places find-by-text per member name, first hit wins.
    async fn resolve_condo(
        &self,
        group: &DuplicateGroup,
        contexts: &[MemberContext],
    ) -> Option<CanonicalResolution> {
        let context = contexts.first()?;
        let cidade = context.cidade_nome.as_deref().unwrap_or_default();
        let uf = context.uf.as_deref().unwrap_or_default();

        for name in &group.member_names {
            let query = format!("{name}, {cidade}, {uf}");
            if let Some(hit) = self.places.find_by_text(&query).await {
                return Some(CanonicalResolution {
                    name: hit.name,
                    source: CanonicalSource::Places,
                    score: 0.9,
                    address: Some(hit.formatted_address),
                });
            }
        }
        None
    }

    /// Geocoder fallback shared by the cascades. With `keep_member_name`
    /// the geocoder only confirms the location and the first member's
    /// spelling is kept (the condo path).
    async fn geocode_fallback(
        &self,
        group: &DuplicateGroup,
        contexts: &[MemberContext],
        score: f64,
        keep_member_name: bool,
    ) -> Option<CanonicalResolution> {
        let first_name = group.member_names.first()?;
        let context = contexts.first()?;

        let mut parts = vec![first_name.clone()];
        if keep_member_name {
            if let Some(rua) = &context.rua_nome {
                parts.push(rua.clone());
            }
            if let Some(bairro) = &context.bairro_nome {
                parts.push(bairro.clone());
            }
        }
        if let Some(cidade) = &context.cidade_nome {
            parts.push(cidade.clone());
        }
        if let Some(uf) = &context.uf {
            parts.push(uf.clone());
        }

        let result = self.geocoder.geocode(&parts.join(", ")).await?;
        let name = if keep_member_name {
            first_name.clone()
        } else {
            match group.entity_kind {
                EntityKind::Neighborhood => result.bairro?,
                EntityKind::Street => result.rua?,
                EntityKind::City => result.cidade?,
                EntityKind::Condo => first_name.clone(),
            }
        };

        Some(CanonicalResolution {
            name,
            source: CanonicalSource::Geocoder,
            score,
            address: result.formatted_address,
        })
    }
}

/// Frequency vote over resolved neighborhood names. Returns
/// `(winner, wins, total_resolved)`; ties break toward the first-seen name
/// and unresolved lookups (`None`) count toward neither.
#[must_use]
pub fn majority_vote(
    resolved: impl IntoIterator<Item = Option<String>>,
) -> Option<(String, usize, usize)> {
    let mut tally: Vec<(String, usize)> = Vec::new();
    let mut total_resolved = 0usize;
    for name in resolved.into_iter().flatten() {
        total_resolved += 1;
        match tally.iter_mut().find(|(seen, _)| *seen == name) {
            Some((_, count)) => *count += 1,
            None => tally.push((name, 1)),
        }
    }

    // Strict > keeps the first-seen name on ties.
    let mut best: Option<(String, usize)> = None;
    for (name, count) in tally {
        if best.as_ref().map_or(true, |(_, c)| count > *c) {
            best = Some((name, count));
        }
    }

    best.map(|(winner, wins)| (winner, wins, total_resolved))
}

/// Highest-Dice registry candidate against the folded query name.
/// Returns `(name, score)`; the first candidate wins ties.
#[must_use]
pub fn best_registry_match(
    query: &str,
    candidates: impl IntoIterator<Item = String>,
) -> Option<(String, f64)> {
    let folded = fold(query);
    let mut best: Option<(String, f64)> = None;
    for nome in candidates {
        let score = dice(&folded, &fold(&nome));
        if best.as_ref().map_or(true, |(_, s)| score > *s) {
            best = Some((nome, score));
        }
    }
    best
}

/// The member whose folded name is closest (bigram Dice) to the canonical.
/// First member wins ties.
#[must_use]
pub fn suggest_canonical(
    member_ids: &[String],
    member_names: &[String],
    canonical_name: &str,
) -> Option<String> {
    let folded_canonical = fold(canonical_name);
    let mut best: Option<(f64, &String)> = None;
    for (id, name) in member_ids.iter().zip(member_names) {
        let score = dice(&fold(name), &folded_canonical);
        if best.as_ref().map_or(true, |(s, _)| score > *s) {
            best = Some((score, id));
        }
    }
    best.map(|(_, id)| id.clone())
}

impl std::fmt::Debug for Enricher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Enricher")
            .field("max_ceps_per_member", &self.max_ceps_per_member)
            .finish_non_exhaustive()
    }
}
