// =============================================================================
// Scoring & Decision Engine — reduce an EnrichmentBundle to a Decision
// =============================================================================
//
// Component subscores in [0, 100], weighted-averaged pro-rata over whichever
// components the Enrichment Orchestrator actually populated within the
// deadline: missing components drop out of both the numerator and the
// denominator rather than scoring as zero, covering
// Liquidity/Volume/Momentum/Safety/HolderDistribution/Social. Hard vetoes
// short-circuit straight to SKIP before any weighting happens.
// =============================================================================

use crate::runtime_config::RuntimeConfig;
use crate::types::{Decision, EnrichmentBundle, ReasonTag, Recommendation};

struct Subscore {
    weight: f64,
    value: Option<f64>,
}

fn liquidity_subscore(bundle: &EnrichmentBundle, cfg: &RuntimeConfig) -> Option<f64> {
    let liquidity = bundle.market.liquidity_usd?;
    let reference = (cfg.absolute_min_liquidity_usd * 10.0).max(1.0);
    Some((liquidity / reference * 100.0).clamp(0.0, 100.0))
}

fn volume_subscore(bundle: &EnrichmentBundle) -> Option<f64> {
    let volume = bundle.market.volume_1h?;
    const REFERENCE_VOLUME_1H: f64 = 10_000.0;
    Some((volume / REFERENCE_VOLUME_1H * 100.0).clamp(0.0, 100.0))
}

fn momentum_subscore(bundle: &EnrichmentBundle) -> Option<f64> {
    let m = &bundle.momentum;
    if m.rsi.is_none() && m.macd_signal.is_none() && m.bollinger_position.is_none() {
        return None;
    }
    let mut score = 50.0;
    if let Some(rsi) = m.rsi {
        // Healthy momentum sits mid-range; extremes pull the score down.
        score += (50.0 - (rsi - 50.0).abs()).clamp(-50.0, 50.0);
    }
    if let Some(macd) = m.macd_signal {
        score += macd.signum() * 10.0;
    }
    if m.volume_spike == Some(true) {
        score += 10.0;
    }
    Some(score.clamp(0.0, 100.0))
}

fn safety_subscore(bundle: &EnrichmentBundle) -> Option<f64> {
    let s = &bundle.security;
    if s.is_honeypot.is_none()
        && s.transfer_pausable.is_none()
        && s.slippage_modifiable.is_none()
        && s.cooldown.is_none()
        && s.is_open_source.is_none()
    {
        return None;
    }
    let mut score = 100.0;
    if s.transfer_pausable == Some(true) {
        score -= 25.0;
    }
    if s.slippage_modifiable == Some(true) {
        score -= 25.0;
    }
    if s.cooldown == Some(true) {
        score -= 10.0;
    }
    if s.is_open_source == Some(false) {
        score -= 15.0;
    }
    if let Some(rug) = s.creator_rug_count {
        score -= (rug as f64) * 10.0;
    }
    Some(score.clamp(0.0, 100.0))
}

fn holder_distribution_subscore(bundle: &EnrichmentBundle) -> Option<f64> {
    let pct = bundle.flow.top_holder_concentration_pct?;
    Some((100.0 - pct).clamp(0.0, 100.0))
}

fn social_subscore(bundle: &EnrichmentBundle) -> Option<f64> {
    let s = &bundle.social;
    let present = [s.has_twitter, s.has_telegram, s.has_website];
    let count = present.iter().filter(|p| **p).count();
    Some(count as f64 / present.len() as f64 * 100.0)
}

fn weighted_average(subscores: &[Subscore]) -> (f64, f64) {
    let total_weight: f64 = subscores.iter().map(|s| s.weight).sum();
    let present_weight: f64 = subscores
        .iter()
        .filter(|s| s.value.is_some())
        .map(|s| s.weight)
        .sum();
    if present_weight <= 0.0 {
        return (0.0, 0.0);
    }
    let sum: f64 = subscores
        .iter()
        .filter_map(|s| s.value.map(|v| v * s.weight))
        .sum();
    let score = sum / present_weight;
    let confidence = (present_weight / total_weight).clamp(0.0, 1.0);
    (score, confidence)
}

/// Hard vetoes: force SKIP with score 0 and confidence 1,
/// regardless of anything else in the bundle.
fn check_vetoes(bundle: &EnrichmentBundle, cfg: &RuntimeConfig) -> Vec<ReasonTag> {
    let mut reasons = Vec::new();

    if bundle.security.is_honeypot == Some(true) {
        reasons.push(ReasonTag::Honeypot);
    }
    if let Some(rug) = bundle.security.creator_rug_count {
        if rug >= cfg.creator_rug_count_threshold {
            reasons.push(ReasonTag::CreatorRugHistory);
        }
    }
    if let Some(liquidity) = bundle.market.liquidity_usd {
        if liquidity < cfg.absolute_min_liquidity_usd {
            reasons.push(ReasonTag::LowLiquidity);
        }
    }
    let pausable_mintable_modifiable = bundle.security.transfer_pausable == Some(true)
        && bundle.security.is_mintable == Some(true)
        && bundle.security.slippage_modifiable == Some(true);
    if pausable_mintable_modifiable {
        reasons.push(ReasonTag::PausableMintableModifiable);
    }

    reasons
}

/// Soft penalties and boosts, applied additively to the weighted score
/// before clamping and banding.
fn soft_adjustments(bundle: &EnrichmentBundle, cfg: &RuntimeConfig) -> (f64, Vec<ReasonTag>) {
    let mut delta = 0.0;
    let mut reasons = Vec::new();

    if let Some(liquidity) = bundle.market.liquidity_usd {
        if liquidity < cfg.absolute_min_liquidity_usd * 5.0 {
            delta -= 10.0;
            reasons.push(ReasonTag::LowLiquidity);
        }
    }
    if let Some(change) = bundle.market.price_change_1h {
        if change.abs() > 50.0 {
            delta -= 15.0;
            reasons.push(ReasonTag::ExtremeVolatility);
        }
    }
    if let Some(pct) = bundle.flow.top_holder_concentration_pct {
        if pct > cfg.top_holder_concentration_veto_pct {
            delta -= 10.0;
            reasons.push(ReasonTag::TopHolderConcentration);
        }
    }
    if !bundle.social.has_twitter && !bundle.social.has_telegram && !bundle.social.has_website {
        delta -= 5.0;
        reasons.push(ReasonTag::NoSocials);
    }
    if let Some(growth) = bundle.market.holder_growth_per_min {
        if growth > cfg.holder_growth_boost_threshold {
            delta += 10.0;
            reasons.push(ReasonTag::HolderGrowth);
        }
    }
    if let Some(ratio) = bundle.traders.profitable_ratio {
        if ratio > cfg.profitable_ratio_boost_threshold {
            delta += 10.0;
            reasons.push(ReasonTag::ProfitableTradersHigh);
        }
    }
    if bundle.security.lp_burned == Some(true) {
        delta += 5.0;
        reasons.push(ReasonTag::LpBurned);
    }
    if let Some(rsi) = bundle.momentum.rsi {
        if rsi >= 70.0 {
            reasons.push(ReasonTag::OverboughtRsi);
        } else if rsi <= 30.0 {
            reasons.push(ReasonTag::OversoldRsi);
        }
    }

    (delta, reasons)
}

fn band(score: f64, cfg: &RuntimeConfig) -> Recommendation {
    if score >= cfg.strong_buy_threshold {
        Recommendation::StrongBuy
    } else if score >= cfg.buy_threshold {
        Recommendation::Buy
    } else if score >= cfg.watch_threshold {
        Recommendation::Watch
    } else {
        Recommendation::Skip
    }
}

fn suggested_position_usd(
    score: f64,
    recommendation: Recommendation,
    cash_usd: f64,
    cfg: &RuntimeConfig,
) -> f64 {
    let base = cash_usd * (cfg.sizing.base_position_pct / 100.0) * (score / 100.0);
    let sized = match recommendation {
        Recommendation::StrongBuy => base * cfg.sizing.strong_buy_size_multiplier,
        _ => base,
    };
    sized.clamp(cfg.sizing.min_trade_usd, cfg.sizing.max_trade_usd)
}

/// Reduce an [`EnrichmentBundle`] to a [`Decision`], given the cash currently
/// available for sizing.
pub fn score_candidate(bundle: &EnrichmentBundle, cash_usd: f64, cfg: &RuntimeConfig) -> Decision {
    let vetoes = check_vetoes(bundle, cfg);
    if !vetoes.is_empty() {
        return Decision {
            address: bundle.address.clone(),
            recommendation: Recommendation::Skip,
            score: 0.0,
            confidence: 1.0,
            reasons: vetoes,
            suggested_position_usd: 0.0,
            suggested_stop_loss_pct: cfg.exit.stop_loss_pct,
            suggested_take_profit_pct: cfg.exit.take_profit_pct,
            reference_price_usd: bundle.market.price_usd,
            timeframe_hint: "veto".to_string(),
        };
    }

    let subscores = [
        Subscore {
            weight: cfg.scoring_weights.liquidity,
            value: liquidity_subscore(bundle, cfg),
        },
        Subscore {
            weight: cfg.scoring_weights.volume,
            value: volume_subscore(bundle),
        },
        Subscore {
            weight: cfg.scoring_weights.momentum,
            value: momentum_subscore(bundle),
        },
        Subscore {
            weight: cfg.scoring_weights.safety,
            value: safety_subscore(bundle),
        },
        Subscore {
            weight: cfg.scoring_weights.holder_distribution,
            value: holder_distribution_subscore(bundle),
        },
        Subscore {
            weight: cfg.scoring_weights.social,
            value: social_subscore(bundle),
        },
    ];

    let (base_score, confidence) = weighted_average(&subscores);
    let (delta, mut reasons) = soft_adjustments(bundle, cfg);
    reasons.extend(bundle.reasons.iter().copied());
    let score = (base_score + delta).clamp(0.0, 100.0);
    let recommendation = band(score, cfg);

    let suggested_position_usd = if matches!(
        recommendation,
        Recommendation::Buy | Recommendation::StrongBuy
    ) {
        suggested_position_usd(score, recommendation, cash_usd, cfg)
    } else {
        0.0
    };

    Decision {
        address: bundle.address.clone(),
        recommendation,
        score,
        confidence,
        reasons,
        suggested_position_usd,
        suggested_stop_loss_pct: cfg.exit.stop_loss_pct,
        suggested_take_profit_pct: cfg.exit.take_profit_pct,
        reference_price_usd: bundle.market.price_usd,
        timeframe_hint: "5m".to_string(),
    }
}
