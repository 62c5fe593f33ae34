//! Tag Extractor (C8): assigns each chunk a subset of a closed,
//! ~120-entry domain tag vocabulary.
//!
//! A tag applies to a chunk if either holds: the tag's display name occurs
//! as a case-insensitive substring of the chunk text, or the tag's
//! precomputed embedding has cosine similarity >= 0.6 with the chunk's own
//! embedding. Tag embeddings are computed once per worker process and
//! cached in a `OnceLock`, replacing the source's module-level mutable
//! global (§9).

use std::sync::OnceLock;

use crate::embedder::Embedder;
use crate::error::Result;
use crate::models::ChunkRecord;

pub const SIMILARITY_THRESHOLD: f32 = 0.6;

/// The closed vocabulary of environmental-assessment domain tags. Kept as a
/// flat list of display names; substring matching is case-insensitive
/// against these exact strings.
pub const VOCABULARY: &[&str] = &[
    "AboriginalInterests",
    "AirQuality",
    "ArchaeologicalResources",
    "BaselineConditions",
    "BiodiversityOffsets",
    "Bonding",
    "CarbonEmissions",
    "ClimateChange",
    "CommunityEngagement",
    "ComplianceMonitoring",
    "ConstructionActivities",
    "ContaminatedSites",
    "CulturalHeritage",
    "DecommissioningPlan",
    "DrinkingWater",
    "EcosystemServices",
    "EmergencyResponse",
    "EnvironmentalAssessment",
    "EnvironmentalManagementPlan",
    "ErosionControl",
    "FirstNationsConsultation",
    "FishHabitat",
    "FloodRisk",
    "ForestryOperations",
    "GreenhouseGasEmissions",
    "GroundwaterQuality",
    "HabitatFragmentation",
    "HazardousMaterials",
    "HeritageResources",
    "HumanHealthRiskAssessment",
    "HydrologyAssessment",
    "IndigenousKnowledge",
    "InvasiveSpecies",
    "LandUsePlanning",
    "MarineEcology",
    "MigratoryBirds",
    "MineWasteManagement",
    "MonitoringProgram",
    "NoiseAndVibration",
    "PermitConditions",
    "PipelineRouting",
    "PublicConsultation",
    "ReclamationPlan",
    "RegulatoryCompliance",
    "RiparianZones",
    "RiskAssessment",
    "SedimentControl",
    "SiteRemediation",
    "SocioeconomicImpact",
    "SoilQuality",
    "SpeciesAtRisk",
    "StakeholderEngagement",
    "SurfaceWaterQuality",
    "TailingsManagement",
    "TrafficImpactAssessment",
    "TraditionalLandUse",
    "VegetationClearing",
    "WasteManagementPlan",
    "WaterQualityMonitoring",
    "WaterUsePermit",
    "WetlandImpacts",
    "WildlifeManagement",
    "AdaptiveManagement",
    "AirEmissionsPermit",
    "AquaticResources",
    "BenthicInvertebrates",
    "BlastingActivities",
    "BorrowPits",
    "CaribouHabitat",
    "ClosurePlan",
    "ConsultationRecord",
    "CumulativeEffects",
    "DamSafety",
    "DredgingActivities",
    "DustControl",
    "EffluentDischarge",
    "EmergencyPreparedness",
    "EndangeredSpecies",
    "EnvironmentalEffectsMonitoring",
    "EnvironmentalProtectionPlan",
    "FishPassage",
    "FuelStorage",
    "GeotechnicalAssessment",
    "GroundDisturbance",
    "HabitatCompensation",
    "HazardIdentification",
    "HeritageImpactAssessment",
    "HydrogeologicalAssessment",
    "IndustrialDischarge",
    "LandReclamation",
    "LightPollution",
    "MetalLeaching",
    "MitigationMeasures",
    "NavigableWaters",
    "NoiseMonitoring",
    "OilSpillResponse",
    "PipelineIntegrity",
    "ProjectDescription",
    "ProponentCommitments",
    "PublicComment",
    "QuarryOperations",
    "RareEcosystems",
    "ReceivingEnvironment",
    "RegionalStudy",
    "ResidualEffects",
    "RiverineHabitat",
    "RoadConstruction",
    "RunoffManagement",
    "SensitiveReceptors",
    "SiteInspection",
    "SlopeStability",
    "SpillContingencyPlan",
    "SurfaceDisturbance",
    "TerrestrialEcology",
    "TrafficManagementPlan",
    "TreatyRights",
    "VegetationManagement",
    "VisualImpactAssessment",
    "WaterBalance",
    "WaterTreatment",
    "WetlandDelineation",
    "WildlifeCorridors",
    "ZoningCompliance",
];

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Worker-lifetime cache of the vocabulary's embeddings, populated once on
/// first use rather than at process startup (so a run that never reaches
/// tag extraction, e.g. `repair-report`, never pays for it).
pub struct TagExtractor {
    embeddings: OnceLock<Vec<Vec<f32>>>,
}

impl TagExtractor {
    pub const fn new() -> Self {
        Self {
            embeddings: OnceLock::new(),
        }
    }

    async fn vocabulary_embeddings(&self, embedder: &dyn Embedder) -> Result<&Vec<Vec<f32>>> {
        if let Some(cached) = self.embeddings.get() {
            return Ok(cached);
        }
        let texts: Vec<String> = VOCABULARY.iter().map(|t| t.to_string()).collect();
        let computed = embedder.embed_batch(&texts).await?;
        Ok(self.embeddings.get_or_init(|| computed))
    }

    /// Tag one chunk, returning the union of substring and semantic matches.
    /// `chunk.embedding` must already be populated (tagging runs after the
    /// chunk has been embedded, per §4.4 step 8).
    pub async fn tag_chunk(&self, embedder: &dyn Embedder, chunk: &mut ChunkRecord) -> Result<()> {
        let vocabulary_embeddings = self.vocabulary_embeddings(embedder).await?;
        let lower_content = chunk.content.to_lowercase();

        let mut tags = Vec::new();
        for (tag, tag_embedding) in VOCABULARY.iter().zip(vocabulary_embeddings) {
            let substring_match = lower_content.contains(&tag.to_lowercase());
            let semantic_match = !chunk.embedding.is_empty()
                && cosine_similarity(&chunk.embedding, tag_embedding) >= SIMILARITY_THRESHOLD;
            if substring_match || semantic_match {
                tags.push(tag.to_string());
            }
        }
        chunk.tags = tags;
        Ok(())
    }

    /// Tag every chunk in a document, bounded by a thread pool sized to
    /// available parallelism for the per-chunk similarity scoring (§5),
    /// and return the document-level tag union.
    pub async fn tag_document(
        &self,
        embedder: &dyn Embedder,
        chunks: &mut [ChunkRecord],
    ) -> Result<Vec<String>> {
        // The actual scoring loop inside `tag_chunk` is CPU-bound dot
        // products over already-computed embeddings, no further I/O, so
        // the CPU-bound fan-out is realized with a scoped thread pool
        // rather than more async tasks (§5): each chunk's cosine-similarity
        // pass runs on a worker thread while this function awaits the one
        // upfront vocabulary-embedding fetch.
        let vocabulary_embeddings = self.vocabulary_embeddings(embedder).await?.clone();
        let worker_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        let results: Vec<Vec<String>> = std::thread::scope(|scope| {
            let chunk_slices = chunks.chunks_mut(chunks.len().div_ceil(worker_count).max(1));
            let handles: Vec<_> = chunk_slices
                .map(|slice| {
                    let vocabulary_embeddings = &vocabulary_embeddings;
                    scope.spawn(move || {
                        let mut per_chunk = Vec::with_capacity(slice.len());
                        for chunk in slice.iter_mut() {
                            let lower_content = chunk.content.to_lowercase();
                            let mut tags = Vec::new();
                            for (tag, tag_embedding) in VOCABULARY.iter().zip(vocabulary_embeddings) {
                                let substring_match = lower_content.contains(&tag.to_lowercase());
                                let semantic_match = !chunk.embedding.is_empty()
                                    && cosine_similarity(&chunk.embedding, tag_embedding)
                                        >= SIMILARITY_THRESHOLD;
                                if substring_match || semantic_match {
                                    tags.push(tag.to_string());
                                }
                            }
                            chunk.tags = tags.clone();
                            per_chunk.push(tags);
                        }
                        per_chunk
                    })
                })
                .collect();
            handles.into_iter().flat_map(|h| h.join().unwrap()).collect()
        });

        let mut document_tags: Vec<String> = results.into_iter().flatten().collect();
        document_tags.sort();
        document_tags.dedup();
        Ok(document_tags)
    }
}

impl Default for TagExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::FakeEmbedder;

    #[test]
    fn cosine_similarity_of_identical_vectors_is_one() {
        let v = vec![0.5, 0.5, 0.5];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_of_orthogonal_vectors_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
    }

    #[tokio::test]
    async fn substring_match_tags_regardless_of_embedding_distance() {
        let embedder = FakeEmbedder { dimensions: 16 };
        let extractor = TagExtractor::new();
        let mut chunk = ChunkRecord::new(0, "Concerns about AirQuality near the site".into(), None);
        chunk.embedding = vec![0.0; 16];
        extractor.tag_chunk(&embedder, &mut chunk).await.unwrap();
        assert!(chunk.tags.contains(&"AirQuality".to_string()));
    }

    #[tokio::test]
    async fn tag_document_returns_sorted_deduplicated_union() {
        let embedder = FakeEmbedder { dimensions: 16 };
        let extractor = TagExtractor::new();
        let mut chunks = vec![
            ChunkRecord::new(0, "AirQuality and AirQuality again".into(), None),
            ChunkRecord::new(1, "FishHabitat concerns raised".into(), None),
        ];
        for chunk in &mut chunks {
            chunk.embedding = vec![0.0; 16];
        }
        let union = extractor.tag_document(&embedder, &mut chunks).await.unwrap();
        assert!(union.contains(&"AirQuality".to_string()));
        assert!(union.contains(&"FishHabitat".to_string()));
        let mut sorted = union.clone();
        sorted.sort();
        assert_eq!(union, sorted);
    }
}
